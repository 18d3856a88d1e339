pub const SCHEMA: &str = r#"
-- Accounts are created by the identity layer; the core only reads them
-- and attaches linked providers. Soft-deleted rows keep their storage
-- footprint so dangling references stay valid.
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL COLLATE NOCASE,
    name TEXT NOT NULL,
    linked_providers TEXT NOT NULL DEFAULT '',
    created_at TEXT DEFAULT (datetime('now')),
    deleted_at TEXT
);

-- Access keys: name is the secret bearer token, friendly_name the
-- human-readable handle shown in listings.
CREATE TABLE IF NOT EXISTS access_keys (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    name TEXT NOT NULL,
    friendly_name TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    is_session INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS apps (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    deleted_at TEXT
);

-- Exactly one row per app carries permission 'Owner'.
CREATE TABLE IF NOT EXISTS collaborators (
    app_id TEXT NOT NULL REFERENCES apps(id),
    account_id TEXT NOT NULL REFERENCES accounts(id),
    permission TEXT NOT NULL,
    PRIMARY KEY (app_id, account_id)
);

-- Deployments are named channels within an app; key is the public
-- identifier clients present on update checks.
CREATE TABLE IF NOT EXISTS deployments (
    id TEXT PRIMARY KEY,
    app_id TEXT NOT NULL REFERENCES apps(id),
    name TEXT NOT NULL,
    key TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    deleted_at TEXT
);

-- One row per release. Labels are assigned in strictly increasing order
-- at insert time; promote/rollback rows reference blobs by path only.
CREATE TABLE IF NOT EXISTS packages (
    id TEXT PRIMARY KEY,
    deployment_id TEXT NOT NULL REFERENCES deployments(id),
    label TEXT NOT NULL,
    app_version TEXT NOT NULL,
    description TEXT,
    is_disabled INTEGER NOT NULL DEFAULT 0,
    is_mandatory INTEGER NOT NULL DEFAULT 0,
    rollout INTEGER,            -- NULL = full rollout
    size INTEGER NOT NULL,
    package_hash TEXT NOT NULL,
    blob_path TEXT NOT NULL,
    manifest_blob_path TEXT,
    release_method TEXT NOT NULL,
    original_label TEXT,
    original_deployment TEXT,
    released_by TEXT,
    upload_time TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS package_diffs (
    id TEXT PRIMARY KEY,
    package_id TEXT NOT NULL REFERENCES packages(id),
    source_package_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    blob_path TEXT NOT NULL,
    UNIQUE (package_id, source_package_hash)
);

CREATE TABLE IF NOT EXISTS metrics (
    deployment_key TEXT NOT NULL,
    label TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (deployment_key, label, metric_type)
);

-- Which label a device currently runs, for active-counter rollover.
CREATE TABLE IF NOT EXISTS client_labels (
    client_id TEXT NOT NULL,
    deployment_key TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (client_id, deployment_key)
);

-- Uniqueness is scoped to live rows; soft-deleted names may be reused.
CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_email
    ON accounts(email) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_access_keys_name
    ON access_keys(name) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_access_keys_friendly
    ON access_keys(account_id, friendly_name) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_deployments_app_name
    ON deployments(app_id, name) WHERE deleted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_access_keys_account ON access_keys(account_id);
CREATE INDEX IF NOT EXISTS idx_collaborators_account ON collaborators(account_id);
CREATE INDEX IF NOT EXISTS idx_deployments_app ON deployments(app_id);
CREATE INDEX IF NOT EXISTS idx_packages_deployment ON packages(deployment_id, upload_time);
CREATE INDEX IF NOT EXISTS idx_package_diffs_package ON package_diffs(package_id);
"#;
