use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Config {
        message: String,
    },
    MalformedRef {
        spec: String,
    },
    MissingRef {
        spec: String,
        remote: String,
    },
    MissingRuntime {
        runtime: String,
        needed_by: String,
    },
    Excluded {
        reference: String,
        remote: String,
    },
    ExtraData {
        reference: String,
        remote: String,
    },
    EolRebase {
        reference: String,
        remote: String,
        successor: String,
    },
    MetadataParse {
        reference: String,
        message: String,
    },
    ChecksumMismatch {
        expected: String,
        actual: String,
        commit: String,
    },
    Network {
        message: String,
    },
    Store {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { message } => {
                write!(f, "configuration error: {}", message)
            }
            Error::MalformedRef { spec } => {
                write!(
                    f,
                    "malformed ref '{}' (more than 2 '/' separators)\n  hint: use name[/arch[/branch]]",
                    spec
                )
            }
            Error::MissingRef { spec, remote } => {
                write!(
                    f,
                    "no match for ref '{}' in remote '{}'\n  hint: check the apps/runtimes lists for remote '{}'",
                    spec, remote, remote
                )
            }
            Error::MissingRuntime { runtime, needed_by } => {
                write!(
                    f,
                    "can't install runtime {} needed by {} (not found in any remote)",
                    runtime, needed_by
                )
            }
            Error::Excluded { reference, remote } => {
                write!(f, "{} in {} is on the exclude list", reference, remote)
            }
            Error::ExtraData { reference, remote } => {
                write!(
                    f,
                    "{} in {} contains potentially non-redistributable extra data\n  hint: add the ID to allow_extra_data for remote '{}' if redistribution is permitted",
                    reference, remote, remote
                )
            }
            Error::EolRebase {
                reference,
                remote,
                successor,
            } => {
                write!(
                    f,
                    "{} in {} is marked as eol-rebase, superseded by {}",
                    reference, remote, successor
                )
            }
            Error::MetadataParse { reference, message } => {
                write!(f, "could not read metadata for {}: {}", reference, message)
            }
            Error::ChecksumMismatch {
                expected,
                actual,
                commit,
            } => {
                write!(
                    f,
                    "checksum verification failed for commit {}\n  expected: {}\n  got:      {}\n  hint: this may indicate a corrupted transfer; try again",
                    commit, expected, actual
                )
            }
            Error::Network { message } => {
                write!(
                    f,
                    "network error: {}\n  hint: check your internet connection and try again",
                    message
                )
            }
            Error::Store { message } => {
                write!(f, "content store error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}
