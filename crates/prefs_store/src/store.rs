use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use agent_bridge::ConnectionMode;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::PrefsStoreError;
use crate::schema::{PrefsRecord, PREFS_VERSION};

/// Preferences file bound to one path.
///
/// Mutations stay in memory until [`PrefsStore::save`], which stamps
/// `updated_at` and replaces the file atomically.
#[derive(Debug)]
pub struct PrefsStore {
    path: PathBuf,
    record: PrefsRecord,
}

impl PrefsStore {
    /// Opens an existing preferences file.
    pub fn open(path: &Path) -> Result<Self, PrefsStoreError> {
        let path = path.to_path_buf();
        let raw = fs::read_to_string(&path)
            .map_err(|source| PrefsStoreError::io("reading preferences file", &path, source))?;
        let record = parse_record(&path, &raw)?;

        Ok(Self { path, record })
    }

    /// Opens `path`, or starts from defaults when the file does not exist yet.
    pub fn open_or_default(path: &Path) -> Result<Self, PrefsStoreError> {
        match fs::metadata(path) {
            Ok(_) => Self::open(path),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                record: PrefsRecord::v1(now_rfc3339()?),
            }),
            Err(source) => Err(PrefsStoreError::io(
                "inspecting preferences file",
                path,
                source,
            )),
        }
    }

    pub fn save(&mut self) -> Result<(), PrefsStoreError> {
        self.record.updated_at = now_rfc3339()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                PrefsStoreError::io("creating preferences directory", parent, source)
            })?;
        }

        let mut encoded = serde_json::to_string_pretty(&self.record)
            .map_err(|source| PrefsStoreError::json_serialize(&self.path, source))?;
        encoded.push('\n');

        let staging = staging_path(&self.path);
        fs::write(&staging, encoded).map_err(|source| {
            PrefsStoreError::io("writing staged preferences file", &staging, source)
        })?;
        fs::rename(&staging, &self.path).map_err(|source| {
            PrefsStoreError::io("replacing preferences file", &self.path, source)
        })?;

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn record(&self) -> &PrefsRecord {
        &self.record
    }

    #[must_use]
    pub fn onboarding_complete(&self) -> bool {
        self.record.onboarding_complete
    }

    pub fn set_onboarding_complete(&mut self, complete: bool) {
        self.record.onboarding_complete = complete;
    }

    #[must_use]
    pub fn default_connection_mode(&self) -> ConnectionMode {
        self.record.default_connection_mode
    }

    pub fn set_default_connection_mode(&mut self, mode: ConnectionMode) {
        self.record.default_connection_mode = mode;
    }
}

pub(crate) fn parse_record(path: &Path, raw: &str) -> Result<PrefsRecord, PrefsStoreError> {
    let record: PrefsRecord =
        serde_json::from_str(raw).map_err(|source| PrefsStoreError::json_parse(path, source))?;

    if record.version != PREFS_VERSION {
        return Err(PrefsStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: record.version,
        });
    }

    if OffsetDateTime::parse(&record.updated_at, &Rfc3339).is_err() {
        return Err(PrefsStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            field: "updated_at",
            value: record.updated_at,
        });
    }

    Ok(record)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

fn now_rfc3339() -> Result<String, PrefsStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(PrefsStoreError::ClockFormat)
}
