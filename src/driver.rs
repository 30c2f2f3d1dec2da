//! Per-file normalization driver.
//!
//! One raw harvest file maps to one output artifact at
//! `<parsed-dir>/<input-filename>.out.json`. Existence of the artifact is the
//! commit marker: a file is normalized into a temporary sibling directory and
//! renamed into place only after its last row, so a crash mid-file leaves
//! nothing at the final path and the file is retried whole on the next run.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{ErrorClass, NormalizeError};
use crate::pgp::PgpKeyStream;
use crate::record::{ContainerType, DecodeOptions, DecodedKey, KeyRecord};
use crate::ssh::decode_openssh_line;
use crate::x509::X509Decoder;

const FILENAME_DATE_FORMAT: &str = "%Y%m%d-%H%M%S";
const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Normalizer {
    raw_dir: PathBuf,
    parsed_dir: PathBuf,
    options: DecodeOptions,
    x509: X509Decoder,
}

/// Per-error-class tallies for one input file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorCounts {
    pub format: usize,
    pub unsupported_algorithm: usize,
    pub unsupported_key_type: usize,
    pub invalid_parameter: usize,
    pub recoverable_packet: usize,
    pub fatal: usize,
    pub io: usize,
}

impl ErrorCounts {
    fn record(&mut self, class: ErrorClass) {
        match class {
            ErrorClass::Format => self.format += 1,
            ErrorClass::UnsupportedAlgorithm => self.unsupported_algorithm += 1,
            ErrorClass::UnsupportedKeyType => self.unsupported_key_type += 1,
            ErrorClass::InvalidParameter => self.invalid_parameter += 1,
            ErrorClass::RecoverablePacket => self.recoverable_packet += 1,
            ErrorClass::Fatal => self.fatal += 1,
            ErrorClass::Io => self.io += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.format
            + self.unsupported_algorithm
            + self.unsupported_key_type
            + self.invalid_parameter
            + self.recoverable_packet
            + self.fatal
            + self.io
    }
}

// Renders only the non-zero classes, so clean files log as plain `0 errors`.
impl fmt::Display for ErrorCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors", self.total())?;
        let classes = [
            ("format", self.format),
            ("unsupported_algorithm", self.unsupported_algorithm),
            ("unsupported_key_type", self.unsupported_key_type),
            ("invalid_parameter", self.invalid_parameter),
            ("recoverable_packet", self.recoverable_packet),
            ("fatal", self.fatal),
            ("io", self.io),
        ];
        let mut separator = " (";
        for (name, count) in classes {
            if count > 0 {
                write!(f, "{separator}{name}: {count}")?;
                separator = ", ";
            }
        }
        if separator == ", " {
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Outcome of normalizing one input file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileReport {
    pub input: PathBuf,
    pub rows: usize,
    pub records: usize,
    pub errors: ErrorCounts,
}

#[derive(Debug, Eq, PartialEq)]
struct SourceFile {
    source: String,
    kind: ContainerType,
    timestamp: Option<String>,
}

impl Normalizer {
    pub fn new(
        raw_dir: impl Into<PathBuf>,
        parsed_dir: impl Into<PathBuf>,
        options: DecodeOptions,
    ) -> Self {
        Normalizer {
            raw_dir: raw_dir.into(),
            parsed_dir: parsed_dir.into(),
            options,
            x509: X509Decoder::new(options),
        }
    }

    /// Overrides the X.509 fallback inspector binary.
    pub fn with_inspector(mut self, inspector: impl Into<String>) -> Self {
        self.x509 = X509Decoder::new(self.options).with_inspector(inspector);
        self
    }

    /// Normalizes every raw `.csv` file that has no output artifact yet.
    ///
    /// A file-level failure (unreadable file, unrecognized filename) skips
    /// that file and the run continues; per-row failures are tallied inside
    /// the file's report.
    pub fn run(&self) -> Result<Vec<FileReport>, NormalizeError> {
        let mut inputs: Vec<PathBuf> = fs::read_dir(&self.raw_dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        inputs.sort();

        let mut reports = Vec::new();
        for input in inputs {
            if self.output_path(&input).exists() {
                log::info!("file already normalized, skipping: {}", input.display());
                continue;
            }
            match self.normalize_file(&input) {
                Ok(report) => reports.push(report),
                Err(e) => log::warn!("skipping file {}: {e}", input.display()),
            }
        }
        Ok(reports)
    }

    pub fn normalize_file(&self, input: &Path) -> Result<FileReport, NormalizeError> {
        let filename = input
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| NormalizeError::format("input path has no utf-8 filename"))?;
        let source_file = parse_source_filename(filename)?;
        log::info!("parsing file: {}", input.display());

        fs::create_dir_all(&self.parsed_dir)?;
        let tmp_dir = sibling_tmp_dir(&self.parsed_dir);
        fs::create_dir_all(&tmp_dir)?;
        let tmp_path = tmp_dir.join(format!("{filename}.out.json.tmp"));
        let output_path = self.output_path(input);

        let reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(&tmp_path)?);

        let mut report = FileReport {
            input: input.to_path_buf(),
            rows: 0,
            records: 0,
            errors: ErrorCounts::default(),
        };

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            report.rows += 1;

            if let Err(e) = self.normalize_row(&source_file, line.trim_end(), &mut writer, &mut report) {
                log::warn!("failed row in {filename}: {e}; row: {line}");
                report.errors.record(e.class());
            }
        }
        writer.flush()?;
        drop(writer);

        log::info!(
            "{}: {} rows, {} records, {}",
            filename,
            report.rows,
            report.records,
            report.errors
        );
        fs::rename(&tmp_path, &output_path)?;
        log::info!("committed {}", output_path.display());
        Ok(report)
    }

    fn normalize_row(
        &self,
        source_file: &SourceFile,
        row: &str,
        writer: &mut impl Write,
        report: &mut FileReport,
    ) -> Result<(), NormalizeError> {
        match source_file.kind {
            ContainerType::OpenSsh => {
                let (user_id, username, key_line) = split_row(row)?;
                for key in decode_openssh_line(key_line, &self.options)? {
                    self.emit(writer, source_file, user_id, username, key)?;
                    report.records += 1;
                }
            }
            ContainerType::Pgp => {
                let (user_id, username, blob) = split_row(row)?;
                for item in PgpKeyStream::from_armored(blob)? {
                    match item {
                        Ok(key) => {
                            self.emit(writer, source_file, user_id, username, key)?;
                            report.records += 1;
                        }
                        Err(e) => {
                            log::warn!("failed packet for user {username}: {e}");
                            report.errors.record(e.class());
                        }
                    }
                }
            }
            ContainerType::X509 => {
                let (user_id, username, blob) = split_row(row)?;
                let key = self.x509.decode(blob)?;
                self.emit(writer, source_file, user_id, username, key)?;
                report.records += 1;
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        writer: &mut impl Write,
        source_file: &SourceFile,
        user_id: Option<&str>,
        username: &str,
        key: DecodedKey,
    ) -> Result<(), NormalizeError> {
        let record = KeyRecord {
            source: source_file.source.clone(),
            container_type: source_file.kind,
            timestamp: source_file.timestamp.clone(),
            username: Some(username.to_owned()),
            user_id: user_id.map(str::to_owned),
            key,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| NormalizeError::format(format!("unserializable record: {e}")))?;
        writeln!(writer, "{json}")?;
        Ok(())
    }

    fn output_path(&self, input: &Path) -> PathBuf {
        let filename = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parsed_dir.join(format!("{filename}.out.json"))
    }
}

/// Splits a `user_id;username;<payload>` or `username;<payload>` row. The
/// payload keeps any further semicolons whole.
fn split_row(row: &str) -> Result<(Option<&str>, &str, &str), NormalizeError> {
    let fields: Vec<&str> = row.splitn(3, ';').collect();
    match fields.as_slice() {
        [user_id, username, payload] => Ok((Some(user_id), username, payload)),
        [username, payload] => Ok((None, username, payload)),
        _ => Err(NormalizeError::format("unsplittable row")),
    }
}

fn sibling_tmp_dir(parsed_dir: &Path) -> PathBuf {
    let mut dir = parsed_dir.as_os_str().to_os_string();
    dir.push("-tmp");
    PathBuf::from(dir)
}

/// Parses `<source>_<kind>[_<YYYYMMDD-HHMMSS>].csv`. Baseline files carry no
/// run timestamp.
fn parse_source_filename(filename: &str) -> Result<SourceFile, NormalizeError> {
    let stem = filename
        .strip_suffix(".csv")
        .ok_or_else(|| NormalizeError::format(format!("not a raw csv file: {filename}")))?;

    for (suffix, kind) in [
        ("_ssh_keys", ContainerType::OpenSsh),
        ("_pgp_keys", ContainerType::Pgp),
        ("_x509_certs", ContainerType::X509),
    ] {
        let Some(position) = stem.rfind(suffix) else {
            continue;
        };
        let source = &stem[..position];
        let rest = &stem[position + suffix.len()..];

        let timestamp = match rest.strip_prefix('_') {
            None if rest.is_empty() => None,
            None => continue,
            Some(date_part) => match NaiveDateTime::parse_from_str(date_part, FILENAME_DATE_FORMAT)
            {
                Ok(parsed) => Some(parsed.format(OUTPUT_DATE_FORMAT).to_string()),
                Err(_) => {
                    log::warn!("unparsable run timestamp in filename: {filename}");
                    None
                }
            },
        };
        return Ok(SourceFile {
            source: source.to_owned(),
            kind,
            timestamp,
        });
    }

    Err(NormalizeError::format(format!(
        "unrecognized raw filename shape: {filename}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const ED_LINE: &str = "ssh-ed25519 \
        AAAAC3NzaC1lZDI1NTE5AAAAIFhmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZm test@example";

    // Armored stream in the escaped single-line form harvested rows use:
    // an rsa primary key, a bad-version subkey, an eddsa subkey and an
    // unknown-algorithm subkey.
    const PGP_ROW_BLOB: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\\n\
        Version: Test 1.0\\n\\n\
        mQANBFloLwABAAwMoQAFEbkABglZaC8AAbkAMwRZaC8AFgkrBgEEAdpHDwEBB0BY\\n\
        ZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZrkACgRZaC8Aad6tvu8=\\n\
        =abcd\\n-----END PGP PUBLIC KEY BLOCK-----\\n";

    #[rstest]
    #[case(
        "github.com_ssh_keys_20180702-100003.csv",
        "github.com",
        ContainerType::OpenSsh,
        Some("2018-07-02 10:00:03")
    )]
    #[case(
        "github.com_ssh_keys.csv",
        "github.com",
        ContainerType::OpenSsh,
        None
    )]
    #[case(
        "keybase_pgp_keys_20190101-000000.csv",
        "keybase",
        ContainerType::Pgp,
        Some("2019-01-01 00:00:00")
    )]
    #[case(
        "scan.example_x509_certs_20200530-120000.csv",
        "scan.example",
        ContainerType::X509,
        Some("2020-05-30 12:00:00")
    )]
    fn filename_shapes(
        #[case] filename: &str,
        #[case] source: &str,
        #[case] kind: ContainerType,
        #[case] timestamp: Option<&str>,
    ) {
        let parsed = parse_source_filename(filename).unwrap();
        assert_eq!(parsed.source, source);
        assert_eq!(parsed.kind, kind);
        assert_eq!(parsed.timestamp.as_deref(), timestamp);
    }

    #[test]
    fn unrecognized_filename_is_rejected() {
        assert!(parse_source_filename("notes.txt").is_err());
        assert!(parse_source_filename("github.com_widgets_20180702-100003.csv").is_err());
    }

    fn write_raw(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, rows.join("\n")).unwrap();
        path
    }

    #[test]
    fn ssh_file_emits_records_and_counts_bad_rows() {
        let raw = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parsed_dir = parsed.path().join("parsed");
        write_raw(
            raw.path(),
            "github.com_ssh_keys_20180702-100003.csv",
            &[
                &format!("1;alice;{ED_LINE}"),
                "2;bob;this is not a key line",
                "unsplittable",
            ],
        );

        let normalizer = Normalizer::new(raw.path(), &parsed_dir, DecodeOptions::default());
        let reports = normalizer.run().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].rows, 3);
        assert_eq!(reports[0].records, 1);
        assert_eq!(reports[0].errors.format, 2);

        let output = parsed_dir.join("github.com_ssh_keys_20180702-100003.csv.out.json");
        let body = fs::read_to_string(output).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1);

        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["source"], "github.com");
        assert_eq!(record["container_type"], "openssh");
        assert_eq!(record["timestamp"], "2018-07-02 10:00:03");
        assert_eq!(record["username"], "alice");
        assert_eq!(record["user_id"], "1");
        assert_eq!(record["curve"], "Curve25519");
        assert_eq!(
            record["uuid"],
            "26101809e0e4f18caafe8900abfedeaae91343b89bce8517f081ad5c020f7e2e\
             9d2745972828d9cb0f3274bcd9f8f17cc3883979aee3734c0187b66edc778853"
        );
    }

    #[test]
    fn second_run_skips_committed_files() {
        let raw = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parsed_dir = parsed.path().join("parsed");
        write_raw(
            raw.path(),
            "github.com_ssh_keys.csv",
            &[&format!("1;alice;{ED_LINE}")],
        );

        let normalizer = Normalizer::new(raw.path(), &parsed_dir, DecodeOptions::default());
        assert_eq!(normalizer.run().unwrap().len(), 1);

        let output = parsed_dir.join("github.com_ssh_keys.csv.out.json");
        let first = fs::read_to_string(&output).unwrap();

        // committed artifact is the completion marker
        assert!(normalizer.run().unwrap().is_empty());
        assert_eq!(fs::read_to_string(&output).unwrap(), first);
    }

    #[test]
    fn pgp_rows_fan_out_per_packet() {
        let raw = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parsed_dir = parsed.path().join("parsed");
        let input = write_raw(
            raw.path(),
            "keybase_pgp_keys_20190101-000000.csv",
            &[&format!("9;dave;{PGP_ROW_BLOB}")],
        );

        let normalizer = Normalizer::new(raw.path(), &parsed_dir, DecodeOptions::default());
        let report = normalizer.normalize_file(&input).unwrap();
        assert_eq!(report.rows, 1);
        assert_eq!(report.records, 3);
        assert_eq!(report.errors.recoverable_packet, 1);

        let body =
            fs::read_to_string(parsed_dir.join("keybase_pgp_keys_20190101-000000.csv.out.json"))
                .unwrap();
        let records: Vec<serde_json::Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records[0]["pgp_pub_algorithm_type"], "rsa");
        assert_eq!(records[0]["is_subkey"], false);
        assert_eq!(records[1]["is_subkey"], true);
        assert_eq!(records[2]["type"], "pgp_105");
    }

    #[test]
    fn x509_rows_route_to_the_certificate_decoder() {
        const EC_CERT_ROW: &str = "-----BEGIN CERTIFICATE-----\\n\
            MIIBdjCCARygAwIBAgIBKjAKBggqhkjOPQQDAjAaMRgwFgYDVQQDDA9lYy5leGFt\\n\
            cGxlLnRlc3QwHhcNMjYwODI1MTUwMTAwWhcNMzYwODIyMTUwMTAwWjAaMRgwFgYD\\n\
            VQQDDA9lYy5leGFtcGxlLnRlc3QwWTATBgcqhkjOPQIBBggqhkjOPQMBBwNCAASX\\n\
            EQ8TEc0/eWacBbole1HpA6SQuJIZuCQ2BQYDbXWoEPsXytw3DsUKGwqpG9/qj3au\\n\
            tzXkxCDTa3HA4aeFx1IRo1MwUTAdBgNVHQ4EFgQU4Hk0EHbfioosPuVK6W0t1v2M\\n\
            p9wwHwYDVR0jBBgwFoAU4Hk0EHbfioosPuVK6W0t1v2Mp9wwDwYDVR0TAQH/BAUw\\n\
            AwEB/zAKBggqhkjOPQQDAgNIADBFAiBH+hCvMaT+HznUhkSdr/pHHDnluEwH+6CC\\n\
            HtrumTDszAIhALqmPv3esBqHRt3DyPVDnLMa+3c18A4XOc5KfuWHb40j\\n\
            -----END CERTIFICATE-----\\n";

        let raw = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parsed_dir = parsed.path().join("parsed");
        let input = write_raw(
            raw.path(),
            "scan.example_x509_certs_20200530-120000.csv",
            &[&format!("erin;{EC_CERT_ROW}")],
        );

        let normalizer = Normalizer::new(raw.path(), &parsed_dir, DecodeOptions::default());
        let report = normalizer.normalize_file(&input).unwrap();
        assert_eq!(report.records, 1);

        let body = fs::read_to_string(
            parsed_dir.join("scan.example_x509_certs_20200530-120000.csv.out.json"),
        )
        .unwrap();
        let record: serde_json::Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(record["container_type"], "x509");
        assert_eq!(record["username"], "erin");
        assert_eq!(record["user_id"], serde_json::Value::Null);
        assert_eq!(record["serial_number"], "42");
        assert_eq!(record["curve"], "secp256r1");
        assert_eq!(record["is_on_curve"], true);
    }

    #[test]
    fn failed_file_leaves_no_artifact() {
        let raw = tempfile::tempdir().unwrap();
        let parsed = tempfile::tempdir().unwrap();
        let parsed_dir = parsed.path().join("parsed");
        let input = write_raw(raw.path(), "misnamed.csv", &["1;alice;whatever"]);

        let normalizer = Normalizer::new(raw.path(), &parsed_dir, DecodeOptions::default());
        assert!(normalizer.normalize_file(&input).is_err());
        assert!(!parsed_dir.join("misnamed.csv.out.json").exists());
    }

    #[test]
    fn error_counts_display_breaks_out_classes() {
        assert_eq!(ErrorCounts::default().to_string(), "0 errors");

        let mut counts = ErrorCounts::default();
        counts.record(ErrorClass::Format);
        counts.record(ErrorClass::Format);
        counts.record(ErrorClass::RecoverablePacket);
        assert_eq!(
            counts.to_string(),
            "3 errors (format: 2, recoverable_packet: 1)"
        );
    }

    #[test]
    fn rows_with_two_fields_have_no_user_id() {
        assert_eq!(split_row("alice;blob").unwrap(), (None, "alice", "blob"));
        assert_eq!(
            split_row("1;alice;a;b;c").unwrap(),
            (Some("1"), "alice", "a;b;c")
        );
        assert!(split_row("justone").is_err());
    }
}
