use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::SCHEMA;
use super::{NewPackage, Store};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now() -> String {
    format_datetime(&Utc::now())
}

/// Maps unique-index violations onto `AlreadyExists`.
fn map_constraint(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::AlreadyExists
        }
        e => Error::from(e),
    }
}

fn join_providers(providers: &[String]) -> String {
    providers.join(",")
}

fn split_providers(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const ACCOUNT_COLS: &str = "id, email, name, linked_providers, created_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        linked_providers: split_providers(&row.get::<_, String>(3)?),
        created_time: parse_datetime(&row.get::<_, String>(4)?),
    })
}

const ACCESS_KEY_COLS: &str =
    "id, account_id, name, friendly_name, created_by, created_at, expires_at, is_session";

fn access_key_from_row(row: &Row<'_>) -> rusqlite::Result<AccessKey> {
    Ok(AccessKey {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        friendly_name: row.get(3)?,
        created_by: row.get(4)?,
        created_time: parse_datetime(&row.get::<_, String>(5)?),
        expires: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        is_session: row.get(7)?,
    })
}

const PACKAGE_COLS: &str = "id, deployment_id, label, app_version, description, is_disabled, \
     is_mandatory, rollout, size, package_hash, blob_path, manifest_blob_path, release_method, \
     original_label, original_deployment, released_by, upload_time";

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<Package> {
    let method: String = row.get(12)?;
    let release_method = ReleaseMethod::parse(&method).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            12,
            rusqlite::types::Type::Text,
            format!("unknown release method '{method}'").into(),
        )
    })?;

    Ok(Package {
        id: row.get(0)?,
        deployment_id: row.get(1)?,
        label: row.get(2)?,
        app_version: row.get(3)?,
        description: row.get(4)?,
        is_disabled: row.get(5)?,
        is_mandatory: row.get(6)?,
        rollout: row.get(7)?,
        size: row.get(8)?,
        package_hash: row.get(9)?,
        blob_path: row.get(10)?,
        manifest_blob_path: row.get(11)?,
        release_method,
        original_label: row.get(13)?,
        original_deployment: row.get(14)?,
        released_by: row.get(15)?,
        upload_time: parse_datetime(&row.get::<_, String>(16)?),
    })
}

fn collaborator_from_row(row: &Row<'_>) -> rusqlite::Result<Collaborator> {
    let raw: String = row.get(2)?;
    let permission = Permission::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown permission '{raw}'").into(),
        )
    })?;

    Ok(Collaborator {
        app_id: row.get(0)?,
        account_id: row.get(1)?,
        permission,
    })
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Account operations

    fn create_account(&self, account: &Account) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO accounts (id, email, name, linked_providers, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    account.id,
                    account.email,
                    account.name,
                    join_providers(&account.linked_providers),
                    format_datetime(&account.created_time),
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            account_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE email = ?1 AND deleted_at IS NULL"),
            params![email],
            account_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_linked_provider(&self, account_id: &str, provider: &str) -> Result<()> {
        let account = self.get_account(account_id)?.ok_or(Error::NotFound)?;
        if account.linked_providers.iter().any(|p| p == provider) {
            return Ok(());
        }

        let mut providers = account.linked_providers;
        providers.push(provider.to_string());
        self.conn().execute(
            "UPDATE accounts SET linked_providers = ?1 WHERE id = ?2",
            params![join_providers(&providers), account_id],
        )?;
        Ok(())
    }

    // Access key operations

    fn create_access_key(&self, key: &AccessKey) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO access_keys (id, account_id, name, friendly_name, created_by, created_at, expires_at, is_session)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key.id,
                    key.account_id,
                    key.name,
                    key.friendly_name,
                    key.created_by,
                    format_datetime(&key.created_time),
                    key.expires.as_ref().map(format_datetime),
                    key.is_session,
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    fn get_access_key(&self, account_id: &str, friendly_name: &str) -> Result<Option<AccessKey>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {ACCESS_KEY_COLS} FROM access_keys
                 WHERE account_id = ?1 AND friendly_name = ?2 AND deleted_at IS NULL"
            ),
            params![account_id, friendly_name],
            access_key_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_access_keys(&self, account_id: &str) -> Result<Vec<AccessKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCESS_KEY_COLS} FROM access_keys
             WHERE account_id = ?1 AND deleted_at IS NULL ORDER BY created_at"
        ))?;

        let rows = stmt.query_map(params![account_id], access_key_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_access_key(&self, key: &AccessKey) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE access_keys SET friendly_name = ?1, expires_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![
                    key.friendly_name,
                    key.expires.as_ref().map(format_datetime),
                    key.id
                ],
            )
            .map_err(map_constraint)?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn remove_access_key(&self, id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE access_keys SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now(), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn account_id_for_access_key(&self, token: &str) -> Result<String> {
        let conn = self.conn();
        let row: Option<(String, Option<String>)> = conn
            .query_row(
                "SELECT k.account_id, k.expires_at FROM access_keys k
                 JOIN accounts a ON a.id = k.account_id AND a.deleted_at IS NULL
                 WHERE k.name = ?1 AND k.deleted_at IS NULL",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (account_id, expires_at) = row.ok_or(Error::NotFound)?;
        if let Some(expires_at) = expires_at {
            if parse_datetime(&expires_at) <= Utc::now() {
                return Err(Error::Expired);
            }
        }
        Ok(account_id)
    }

    // App operations

    fn add_app(&self, account_id: &str, app: &App) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let duplicates: i64 = tx.query_row(
            "SELECT COUNT(*) FROM apps a
             JOIN collaborators c ON c.app_id = a.id
             WHERE c.account_id = ?1 AND c.permission = 'Owner'
               AND a.name = ?2 AND a.deleted_at IS NULL",
            params![account_id, app.name],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            return Err(Error::AlreadyExists);
        }

        tx.execute(
            "INSERT INTO apps (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![app.id, app.name, format_datetime(&app.created_time)],
        )?;
        tx.execute(
            "INSERT INTO collaborators (app_id, account_id, permission) VALUES (?1, ?2, 'Owner')",
            params![app.id, account_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_app(&self, id: &str) -> Result<Option<App>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM apps WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
            |row| {
                Ok(App {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_time: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_app_by_name(&self, account_id: &str, name: &str) -> Result<Option<App>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT a.id, a.name, a.created_at FROM apps a
             JOIN collaborators c ON c.app_id = a.id
             WHERE c.account_id = ?1 AND a.name = ?2 AND a.deleted_at IS NULL",
            params![account_id, name],
            |row| {
                Ok(App {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_time: parse_datetime(&row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_apps_for_account(&self, account_id: &str) -> Result<Vec<App>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name, a.created_at FROM apps a
             JOIN collaborators c ON c.app_id = a.id
             WHERE c.account_id = ?1 AND a.deleted_at IS NULL
             ORDER BY a.name",
        )?;

        let rows = stmt.query_map(params![account_id], |row| {
            Ok(App {
                id: row.get(0)?,
                name: row.get(1)?,
                created_time: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_app(&self, app_id: &str, owner_account_id: &str, name: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let duplicates: i64 = tx.query_row(
            "SELECT COUNT(*) FROM apps a
             JOIN collaborators c ON c.app_id = a.id
             WHERE c.account_id = ?1 AND c.permission = 'Owner'
               AND a.name = ?2 AND a.id != ?3 AND a.deleted_at IS NULL",
            params![owner_account_id, name, app_id],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            return Err(Error::AlreadyExists);
        }

        let rows = tx.execute(
            "UPDATE apps SET name = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![name, app_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.commit()?;
        Ok(())
    }

    fn remove_app(&self, app_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted_at = now();

        let rows = tx.execute(
            "UPDATE apps SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![deleted_at, app_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.execute(
            "UPDATE deployments SET deleted_at = ?1 WHERE app_id = ?2 AND deleted_at IS NULL",
            params![deleted_at, app_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn transfer_app(&self, app_id: &str, target_account_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owner: String = tx
            .query_row(
                "SELECT account_id FROM collaborators WHERE app_id = ?1 AND permission = 'Owner'",
                params![app_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(Error::NotFound)?;

        if owner == target_account_id {
            return Err(Error::AlreadyExists);
        }

        tx.execute(
            "UPDATE collaborators SET permission = 'Collaborator'
             WHERE app_id = ?1 AND account_id = ?2",
            params![app_id, owner],
        )?;
        tx.execute(
            "INSERT INTO collaborators (app_id, account_id, permission)
             VALUES (?1, ?2, 'Owner')
             ON CONFLICT (app_id, account_id) DO UPDATE SET permission = 'Owner'",
            params![app_id, target_account_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // Collaborator operations

    fn list_collaborators(&self, app_id: &str) -> Result<Vec<Collaborator>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT app_id, account_id, permission FROM collaborators
             WHERE app_id = ?1 ORDER BY account_id",
        )?;

        let rows = stmt.query_map(params![app_id], collaborator_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_collaborator(&self, app_id: &str, account_id: &str) -> Result<Option<Collaborator>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT app_id, account_id, permission FROM collaborators
             WHERE app_id = ?1 AND account_id = ?2",
            params![app_id, account_id],
            collaborator_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_collaborator(&self, collaborator: &Collaborator) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO collaborators (app_id, account_id, permission) VALUES (?1, ?2, ?3)",
                params![
                    collaborator.app_id,
                    collaborator.account_id,
                    collaborator.permission.as_str(),
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    fn remove_collaborator(&self, app_id: &str, account_id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "DELETE FROM collaborators WHERE app_id = ?1 AND account_id = ?2",
            params![app_id, account_id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Deployment operations

    fn add_deployment(&self, deployment: &Deployment) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO deployments (id, app_id, name, key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    deployment.id,
                    deployment.app_id,
                    deployment.name,
                    deployment.key,
                    format_datetime(&deployment.created_time),
                ],
            )
            .map_err(map_constraint)?;
        Ok(())
    }

    fn get_deployment(&self, app_id: &str, name: &str) -> Result<Option<Deployment>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, app_id, name, key, created_at FROM deployments
             WHERE app_id = ?1 AND name = ?2 AND deleted_at IS NULL",
            params![app_id, name],
            deployment_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_deployment_by_key(&self, key: &str) -> Result<Option<Deployment>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, app_id, name, key, created_at FROM deployments
             WHERE key = ?1 AND deleted_at IS NULL",
            params![key],
            deployment_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_deployments(&self, app_id: &str) -> Result<Vec<Deployment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, app_id, name, key, created_at FROM deployments
             WHERE app_id = ?1 AND deleted_at IS NULL ORDER BY created_at, rowid",
        )?;

        let rows = stmt.query_map(params![app_id], deployment_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_deployment(&self, id: &str, name: &str) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE deployments SET name = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![name, id],
            )
            .map_err(map_constraint)?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn remove_deployment(&self, id: &str) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE deployments SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now(), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Package operations

    fn insert_package(&self, deployment_id: &str, new: NewPackage) -> Result<Package> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let latest = tx
            .query_row(
                &format!(
                    "SELECT {PACKAGE_COLS} FROM packages
                     WHERE deployment_id = ?1 AND deleted_at IS NULL
                     ORDER BY upload_time DESC, rowid DESC LIMIT 1"
                ),
                params![deployment_id],
                package_from_row,
            )
            .optional()?;

        if let Some(latest) = &latest {
            if latest.rollout_unfinished() && !latest.is_disabled {
                return Err(Error::Conflict(
                    "the previous release has an unfinished rollout; complete or disable it first"
                        .to_string(),
                ));
            }
            if latest.package_hash == new.package_hash {
                return Err(Error::Conflict(
                    "the package is identical to the latest release".to_string(),
                ));
            }
        }

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM packages WHERE deployment_id = ?1 AND deleted_at IS NULL",
            params![deployment_id],
            |row| row.get(0),
        )?;

        let package = Package {
            id: new.id,
            deployment_id: deployment_id.to_string(),
            label: format!("v{}", count + 1),
            app_version: new.app_version,
            description: new.description,
            is_disabled: new.is_disabled,
            is_mandatory: new.is_mandatory,
            rollout: new.rollout,
            size: new.size,
            package_hash: new.package_hash,
            blob_path: new.blob_path,
            manifest_blob_path: new.manifest_blob_path,
            release_method: new.release_method,
            original_label: new.original_label,
            original_deployment: new.original_deployment,
            released_by: new.released_by,
            upload_time: Utc::now(),
        };

        tx.execute(
            &format!(
                "INSERT INTO packages ({PACKAGE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                package.id,
                package.deployment_id,
                package.label,
                package.app_version,
                package.description,
                package.is_disabled,
                package.is_mandatory,
                package.rollout,
                package.size,
                package.package_hash,
                package.blob_path,
                package.manifest_blob_path,
                package.release_method.as_str(),
                package.original_label,
                package.original_deployment,
                package.released_by,
                format_datetime(&package.upload_time),
            ],
        )?;

        tx.commit()?;
        Ok(package)
    }

    fn package_history(&self, deployment_id: &str) -> Result<Vec<Package>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLS} FROM packages
             WHERE deployment_id = ?1 AND deleted_at IS NULL
             ORDER BY upload_time, rowid"
        ))?;

        let rows = stmt.query_map(params![deployment_id], package_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn latest_package(&self, deployment_id: &str) -> Result<Option<Package>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PACKAGE_COLS} FROM packages
                 WHERE deployment_id = ?1 AND deleted_at IS NULL
                 ORDER BY upload_time DESC, rowid DESC LIMIT 1"
            ),
            params![deployment_id],
            package_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_package_by_label(&self, deployment_id: &str, label: &str) -> Result<Option<Package>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {PACKAGE_COLS} FROM packages
                 WHERE deployment_id = ?1 AND label = ?2 AND deleted_at IS NULL"
            ),
            params![deployment_id, label],
            package_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_package(&self, package: &Package) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE packages SET app_version = ?1, description = ?2, is_disabled = ?3,
                    is_mandatory = ?4, rollout = ?5
             WHERE id = ?6 AND deleted_at IS NULL",
            params![
                package.app_version,
                package.description,
                package.is_disabled,
                package.is_mandatory,
                package.rollout,
                package.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn clear_package_history(&self, deployment_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE packages SET deleted_at = ?1 WHERE deployment_id = ?2 AND deleted_at IS NULL",
            params![now(), deployment_id],
        )?;
        Ok(())
    }

    // Package diff operations

    fn add_package_diff(&self, diff: &PackageDiff) -> Result<()> {
        self.conn().execute(
            "INSERT INTO package_diffs (id, package_id, source_package_hash, size, blob_path)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (package_id, source_package_hash) DO UPDATE SET
                size = excluded.size,
                blob_path = excluded.blob_path",
            params![
                diff.id,
                diff.package_id,
                diff.source_package_hash,
                diff.size,
                diff.blob_path,
            ],
        )?;
        Ok(())
    }

    fn get_package_diff(
        &self,
        package_id: &str,
        source_package_hash: &str,
    ) -> Result<Option<PackageDiff>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, package_id, source_package_hash, size, blob_path FROM package_diffs
             WHERE package_id = ?1 AND source_package_hash = ?2",
            params![package_id, source_package_hash],
            package_diff_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_package_diffs(&self, package_id: &str) -> Result<Vec<PackageDiff>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, package_id, source_package_hash, size, blob_path FROM package_diffs
             WHERE package_id = ?1 ORDER BY source_package_hash",
        )?;

        let rows = stmt.query_map(params![package_id], package_diff_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Metric operations

    fn increment_metric(
        &self,
        deployment_key: &str,
        label: &str,
        metric: MetricType,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO metrics (deployment_key, label, metric_type, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT (deployment_key, label, metric_type) DO UPDATE SET count = count + 1",
            params![deployment_key, label, metric.as_str()],
        )?;
        Ok(())
    }

    fn decrement_metric(
        &self,
        deployment_key: &str,
        label: &str,
        metric: MetricType,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE metrics SET count = CASE WHEN count > 0 THEN count - 1 ELSE 0 END
             WHERE deployment_key = ?1 AND label = ?2 AND metric_type = ?3",
            params![deployment_key, label, metric.as_str()],
        )?;
        Ok(())
    }

    fn deployment_metrics(&self, deployment_key: &str) -> Result<BTreeMap<String, LabelMetrics>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT label, metric_type, count FROM metrics WHERE deployment_key = ?1",
        )?;

        let rows = stmt.query_map(params![deployment_key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut aggregated: BTreeMap<String, LabelMetrics> = BTreeMap::new();
        for row in rows {
            let (label, metric_type, count) = row?;
            let entry = aggregated.entry(label).or_default();
            match MetricType::parse(&metric_type) {
                Some(MetricType::Active) => entry.active += count,
                Some(MetricType::Downloaded) => entry.downloads += count,
                Some(MetricType::DeploymentSucceeded) => entry.installed += count,
                Some(MetricType::DeploymentFailed) => entry.failed += count,
                None => tracing::warn!("unknown metric type '{metric_type}' in database"),
            }
        }
        Ok(aggregated)
    }

    // Client label operations

    fn get_client_label(&self, deployment_key: &str, client_id: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT label FROM client_labels WHERE client_id = ?1 AND deployment_key = ?2",
            params![client_id, deployment_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    fn set_client_label(&self, deployment_key: &str, client_id: &str, label: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO client_labels (client_id, deployment_key, label)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (client_id, deployment_key) DO UPDATE SET label = excluded.label",
            params![client_id, deployment_key, label],
        )?;
        Ok(())
    }
}

fn deployment_from_row(row: &Row<'_>) -> rusqlite::Result<Deployment> {
    Ok(Deployment {
        id: row.get(0)?,
        app_id: row.get(1)?,
        name: row.get(2)?,
        key: row.get(3)?,
        created_time: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn package_diff_from_row(row: &Row<'_>) -> rusqlite::Result<PackageDiff> {
    Ok(PackageDiff {
        id: row.get(0)?,
        package_id: row.get(1)?,
        source_package_hash: row.get(2)?,
        size: row.get(3)?,
        blob_path: row.get(4)?,
    })
}
