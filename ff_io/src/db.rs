//! Deploy database.
//!
//! Records which refs are deployed in the image, from which remote and
//! commit, and with which sub-path restriction. Later build stages read
//! this instead of re-walking the deploy tree.

use std::path::Path;

use rusqlite::{Connection, params};

use ff_core::Error;

pub struct DeployDb {
    conn: Connection,
}

impl std::fmt::Debug for DeployDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployDb").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedRef {
    pub ref_str: String,
    pub remote: String,
    pub commit: String,
    pub subpaths: Vec<String>,
    pub installed_size: u64,
    pub deployed_at: i64,
}

impl DeployDb {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::Store {
            message: format!("failed to open deploy database: {}", e),
        })?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store {
            message: format!("failed to open in-memory deploy database: {}", e),
        })?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<(), Error> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS deployed_refs (
                ref_str TEXT PRIMARY KEY,
                remote TEXT NOT NULL,
                commit_id TEXT NOT NULL,
                subpaths TEXT NOT NULL DEFAULT '',
                installed_size INTEGER NOT NULL DEFAULT 0,
                deployed_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| Error::Store {
            message: format!("failed to initialize deploy schema: {}", e),
        })
    }

    pub fn record_deploy(
        &self,
        ref_str: &str,
        remote: &str,
        commit: &str,
        subpaths: &[String],
        installed_size: u64,
    ) -> Result<(), Error> {
        let deployed_at = chrono::Utc::now().timestamp();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO deployed_refs
                 (ref_str, remote, commit_id, subpaths, installed_size, deployed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ref_str,
                    remote,
                    commit,
                    subpaths.join(";"),
                    installed_size as i64,
                    deployed_at
                ],
            )
            .map_err(|e| Error::Store {
                message: format!("failed to record deploy of {}: {}", ref_str, e),
            })?;
        Ok(())
    }

    pub fn get_deployed(&self, ref_str: &str) -> Option<DeployedRef> {
        self.conn
            .query_row(
                "SELECT ref_str, remote, commit_id, subpaths, installed_size, deployed_at
                 FROM deployed_refs WHERE ref_str = ?1",
                params![ref_str],
                row_to_deployed,
            )
            .ok()
    }

    pub fn list_deployed(&self) -> Result<Vec<DeployedRef>, Error> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ref_str, remote, commit_id, subpaths, installed_size, deployed_at
                 FROM deployed_refs ORDER BY ref_str",
            )
            .map_err(|e| Error::Store {
                message: format!("failed to prepare statement: {}", e),
            })?;

        let refs = stmt
            .query_map([], row_to_deployed)
            .map_err(|e| Error::Store {
                message: format!("failed to query deployed refs: {}", e),
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Store {
                message: format!("failed to collect deployed refs: {}", e),
            })?;

        Ok(refs)
    }
}

fn row_to_deployed(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeployedRef> {
    let subpaths: String = row.get(3)?;
    Ok(DeployedRef {
        ref_str: row.get(0)?,
        remote: row.get(1)?,
        commit: row.get(2)?,
        subpaths: if subpaths.is_empty() {
            Vec::new()
        } else {
            subpaths.split(';').map(|s| s.to_string()).collect()
        },
        installed_size: row.get::<_, i64>(4)? as u64,
        deployed_at: row.get(5)?,
    })
}
