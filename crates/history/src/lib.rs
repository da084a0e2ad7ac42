// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Persisted host state (spec.md §6/§8): an `ImageHistory` row appended each
//! time the applied config's hash changes, and the `host_image_packages`
//! catalog a `HostDBService` keeps in sync with the installed set.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use diesel::prelude::*;
use diesel::{Connection as _, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use sha2::{Digest, Sha256};
use thiserror::Error;

mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/migrations");

#[derive(Debug, Error)]
pub enum Error {
    #[error("row not found")]
    RowNotFound,
    #[error("diesel")]
    Diesel(#[from] diesel::result::Error),
    #[error("diesel connection")]
    Connection(#[from] diesel::ConnectionError),
    #[error("diesel migration")]
    Migration(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// One appended row of applied-config history.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHistoryEntry {
    pub image_name: String,
    pub config: String,
    pub image_date: String,
}

#[derive(Clone)]
struct Connection(Arc<Mutex<SqliteConnection>>);

impl Connection {
    fn new(connection: SqliteConnection) -> Self {
        Self(Arc::new(Mutex::new(connection)))
    }

    fn exec<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> T) -> T {
        let mut guard = self.0.lock().expect("history db mutex");
        f(&mut guard)
    }
}

/// The host's SQLite-backed state: image history and the package catalog,
/// per spec.md §6's `HostDBService`.
#[derive(Clone)]
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    pub fn new(url: &str) -> Result<Self, Error> {
        let mut connection = SqliteConnection::establish(url)?;
        connection.run_pending_migrations(MIGRATIONS).map_err(Error::Migration)?;

        Ok(Self {
            conn: Connection::new(connection),
        })
    }

    /// Appends an `ImageHistory` row iff `config`'s hash differs from the
    /// most recently appended row's hash. Returns whether a row was
    /// appended.
    pub fn record_if_changed(&self, image_name: &str, config: &str) -> Result<bool, Error> {
        let hash = hex::encode(Sha256::digest(config.as_bytes()));

        let unchanged = self.conn.exec(|conn| {
            schema::image_history::table
                .order(schema::image_history::id.desc())
                .select(schema::image_history::config_hash)
                .first::<String>(conn)
                .optional()
        })?;

        if unchanged.as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        self.conn.exec(|conn| {
            diesel::insert_into(schema::image_history::table)
                .values((
                    schema::image_history::image_name.eq(image_name),
                    schema::image_history::config.eq(config),
                    schema::image_history::config_hash.eq(&hash),
                    schema::image_history::image_date.eq(&now),
                ))
                .execute(conn)
        })?;

        Ok(true)
    }

    /// Returns the most recently appended history row, if any.
    pub fn most_recent(&self) -> Result<Option<ImageHistoryEntry>, Error> {
        self.conn.exec(|conn| {
            schema::image_history::table
                .order(schema::image_history::id.desc())
                .select((
                    schema::image_history::image_name,
                    schema::image_history::config,
                    schema::image_history::image_date,
                ))
                .first::<(String, String, String)>(conn)
                .optional()
                .map(|row| row.map(|(image_name, config, image_date)| ImageHistoryEntry {
                    image_name,
                    config,
                    image_date,
                }))
                .map_err(Error::from)
        })
    }

    /// Replaces the `host_image_packages` catalog wholesale, keyed by
    /// `(name, version)`.
    pub fn set_package_catalog(&self, packages: &[(String, String)]) -> Result<(), Error> {
        self.conn.exec(|conn| {
            conn.transaction(|tx| {
                diesel::delete(schema::host_image_packages::table).execute(tx)?;

                if !packages.is_empty() {
                    let values: Vec<_> = packages
                        .iter()
                        .map(|(name, version)| {
                            (
                                schema::host_image_packages::name.eq(name),
                                schema::host_image_packages::version.eq(version),
                            )
                        })
                        .collect();
                    diesel::insert_into(schema::host_image_packages::table)
                        .values(values)
                        .execute(tx)?;
                }

                Ok(())
            })
        })
    }

    pub fn package_catalog(&self) -> Result<Vec<(String, String)>, Error> {
        self.conn.exec(|conn| {
            schema::host_image_packages::table
                .select((schema::host_image_packages::name, schema::host_image_packages::version))
                .load::<(String, String)>(conn)
                .map_err(Error::from)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn memory_db() -> HistoryDb {
        HistoryDb::new(":memory:").unwrap()
    }

    #[test]
    fn records_first_config_and_skips_unchanged_repeat() {
        let db = memory_db();

        assert!(db.record_if_changed("alt:sisyphus", "config-a").unwrap());
        assert!(!db.record_if_changed("alt:sisyphus", "config-a").unwrap());

        let entry = db.most_recent().unwrap().unwrap();
        assert_eq!(entry.config, "config-a");
    }

    #[test]
    fn records_again_when_config_changes() {
        let db = memory_db();

        db.record_if_changed("alt:sisyphus", "config-a").unwrap();
        assert!(db.record_if_changed("alt:sisyphus", "config-b").unwrap());

        let entry = db.most_recent().unwrap().unwrap();
        assert_eq!(entry.config, "config-b");
    }

    #[test]
    fn package_catalog_round_trips() {
        let db = memory_db();
        let packages = vec![("bash".to_owned(), "5.2".to_owned()), ("curl".to_owned(), "8.9".to_owned())];

        db.set_package_catalog(&packages).unwrap();
        let mut loaded = db.package_catalog().unwrap();
        loaded.sort();

        assert_eq!(loaded, packages);
    }

    #[test]
    fn set_package_catalog_replaces_prior_contents() {
        let db = memory_db();
        db.set_package_catalog(&[("bash".to_owned(), "5.2".to_owned())]).unwrap();
        db.set_package_catalog(&[("curl".to_owned(), "8.9".to_owned())]).unwrap();

        assert_eq!(db.package_catalog().unwrap(), vec![("curl".to_owned(), "8.9".to_owned())]);
    }
}
