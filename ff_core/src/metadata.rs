//! Typed view over a ref's embedded manifest.
//!
//! The manifest is a keyfile with an `[Application]` or `[Runtime]` group,
//! optionally an `[ExtensionOf]` group for extensions and an `[Extra Data]`
//! group for refs that download vendor payloads at install time.

use crate::keyfile::{KeyFile, KeyFileError};
use crate::refspec::{RefId, RefKind};

const APPLICATION_GROUP: &str = "Application";
const EXTENSION_OF_GROUP: &str = "ExtensionOf";
const EXTRA_DATA_GROUP: &str = "Extra Data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefMetadata {
    keyfile: KeyFile,
}

impl RefMetadata {
    pub fn parse(input: &str) -> Result<Self, KeyFileError> {
        Ok(Self {
            keyfile: KeyFile::parse(input)?,
        })
    }

    /// Whether the ref carries extra data that is downloaded from a vendor
    /// URL at install time and may not be redistributable.
    pub fn has_extra_data(&self) -> bool {
        self.keyfile.has_section(EXTRA_DATA_GROUP)
    }

    /// The ref's hard runtime dependency, if any.
    ///
    /// Applications always depend on their declared runtime. Extensions only
    /// do when they carry extra data whose apply step needs the runtime (no
    /// `NoRuntime=true` escape hatch). Plain runtimes have no hard
    /// dependency. A manifest naming the ref itself as its runtime is
    /// ignored.
    pub fn runtime_for(&self, id: &RefId) -> Option<RefId> {
        let group = if id.kind == RefKind::App {
            APPLICATION_GROUP
        } else if self.has_extra_data()
            && !self
                .keyfile
                .get_bool(EXTRA_DATA_GROUP, "NoRuntime")
                .unwrap_or(false)
        {
            EXTENSION_OF_GROUP
        } else {
            return None;
        };

        let runtime = self.keyfile.get(group, "runtime")?;
        let runtime_id = RefId::parse(&format!("runtime/{}", runtime)).ok()?;
        if runtime_id == *id {
            return None;
        }
        Some(runtime_id)
    }

    /// The SDK named by the manifest, as a `name/arch/branch` triple.
    pub fn sdk(&self) -> Option<&str> {
        self.keyfile
            .get(APPLICATION_GROUP, "sdk")
            .or_else(|| self.keyfile.get("Runtime", "sdk"))
    }
}
