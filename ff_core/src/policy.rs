//! Install policy checks.
//!
//! Every candidate ref passes through the gate before entering the install
//! set. Exclusion and extra-data violations are fatal for wanted refs and
//! runtime dependencies but only skip the ref when it is a related
//! extension; an eol-rebase marker is fatal everywhere, since a superseded
//! ref should not be installed at all. A plain end-of-life marker is only
//! warned about.

use crate::Error;
use crate::catalog::FullRef;
use crate::remote::RemoteConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    Excluded,
    ExtraData,
    EolRebase { successor: String },
}

impl PolicyViolation {
    /// The fatal form of this violation for the given ref.
    pub fn into_error(self, full_ref: &FullRef) -> Error {
        let reference = full_ref.id.to_string();
        let remote = full_ref.remote.clone();
        match self {
            PolicyViolation::Excluded => Error::Excluded { reference, remote },
            PolicyViolation::ExtraData => Error::ExtraData { reference, remote },
            PolicyViolation::EolRebase { successor } => Error::EolRebase {
                reference,
                remote,
                successor,
            },
        }
    }
}

/// Check a candidate against its owning remote's policy lists.
///
/// A plain EOL marker is reported here as a warning and never rejects the
/// ref. The caller decides whether a returned violation is fatal.
pub fn evaluate(full_ref: &FullRef, remote: &RemoteConfig) -> Result<(), PolicyViolation> {
    if let Some(eol) = &full_ref.eol {
        eprintln!(
            "    Warning: {} in {} is marked as EOL: {}",
            full_ref.id, full_ref.remote, eol
        );
    }

    if remote.check_excluded(&full_ref.id.name) {
        return Err(PolicyViolation::Excluded);
    }

    if full_ref.has_extra_data() && !remote.check_allow_extra_data(&full_ref.id.name) {
        return Err(PolicyViolation::ExtraData);
    }

    if let Some(successor) = &full_ref.eol_rebase {
        return Err(PolicyViolation::EolRebase {
            successor: successor.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RefEntry;
    use crate::refspec::{RefId, RefKind};
    use std::collections::BTreeMap;

    fn full_ref(name: &str, metadata: &str, eol: Option<&str>, eol_rebase: Option<&str>) -> FullRef {
        let id = RefId::new(RefKind::App, name, "x86_64", "master");
        let entry = RefEntry {
            commit: "c1".to_string(),
            metadata: metadata.to_string(),
            eol: eol.map(|s| s.to_string()),
            eol_rebase: eol_rebase.map(|s| s.to_string()),
            ..Default::default()
        };
        FullRef::from_entry("example", id, &entry, Vec::new()).unwrap()
    }

    fn remote_with(option: &str, value: &str) -> RemoteConfig {
        let mut opts = BTreeMap::new();
        opts.insert("url".to_string(), "https://example.com".to_string());
        opts.insert(option.to_string(), value.to_string());
        RemoteConfig::from_section("example", &opts)
    }

    #[test]
    fn clean_ref_passes() {
        let r = full_ref("com.example.App1", "[Application]\nname=x\n", None, None);
        let remote = remote_with("title", "Example");
        assert!(evaluate(&r, &remote).is_ok());
    }

    #[test]
    fn excluded_name_is_rejected() {
        let r = full_ref("com.example.App1", "[Application]\nname=x\n", None, None);
        let remote = remote_with("exclude", "com.example.App1");
        assert_eq!(evaluate(&r, &remote), Err(PolicyViolation::Excluded));
    }

    #[test]
    fn extra_data_needs_allow_list() {
        let md = "[Application]\nname=x\n[Extra Data]\nname=blob.bin\n";
        let r = full_ref("com.example.AppExtraData", md, None, None);

        let remote = remote_with("title", "Example");
        assert_eq!(evaluate(&r, &remote), Err(PolicyViolation::ExtraData));

        let remote = remote_with("allow_extra_data", "com.example.AppExtraData");
        assert!(evaluate(&r, &remote).is_ok());
    }

    #[test]
    fn plain_eol_is_not_a_violation() {
        let r = full_ref("com.example.App1", "[Application]\nname=x\n", Some("Dead"), None);
        let remote = remote_with("title", "Example");
        assert!(evaluate(&r, &remote).is_ok());
    }

    #[test]
    fn eol_rebase_is_a_violation() {
        let r = full_ref(
            "com.example.App1",
            "[Application]\nname=x\n",
            Some("Dead"),
            Some("com.example.App2"),
        );
        let remote = remote_with("title", "Example");
        let violation = evaluate(&r, &remote).unwrap_err();
        assert_eq!(
            violation,
            PolicyViolation::EolRebase {
                successor: "com.example.App2".to_string()
            }
        );

        let err = violation.into_error(&r);
        assert!(matches!(err, Error::EolRebase { .. }));
        assert!(err.to_string().contains("com.example.App2"));
    }

    #[test]
    fn exclusion_wins_over_extra_data() {
        let md = "[Application]\nname=x\n[Extra Data]\nname=blob.bin\n";
        let r = full_ref("com.example.AppExtraData", md, None, None);
        let remote = remote_with("exclude", "com.example.AppExtraData");
        assert_eq!(evaluate(&r, &remote), Err(PolicyViolation::Excluded));
    }
}
