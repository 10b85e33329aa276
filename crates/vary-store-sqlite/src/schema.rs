//! SQL schema for the Vary SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision; future migrations will be gated on it.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS variants (
    variant_id        TEXT PRIMARY KEY,
    parent_kind       TEXT NOT NULL CHECK (parent_kind IN ('post', 'experiment')),
    parent_id         TEXT NOT NULL,
    name              TEXT NOT NULL CHECK (length(trim(name)) > 0),
    content           TEXT NOT NULL DEFAULT '',
    is_control        INTEGER NOT NULL DEFAULT 0,
    price_cents       INTEGER CHECK (price_cents IS NULL OR price_cents >= 0),
    weight            INTEGER NOT NULL DEFAULT 1 CHECK (weight >= 0),
    created_at        TEXT NOT NULL,   -- RFC 3339, fixed-width micros
    assignment_count  INTEGER NOT NULL DEFAULT 0,
    exposure_count    INTEGER NOT NULL DEFAULT 0,
    conversion_count  INTEGER NOT NULL DEFAULT 0,
    CHECK (parent_kind = 'post' OR is_control = 0)
);

-- At most one control variant per post.
CREATE UNIQUE INDEX IF NOT EXISTS variants_one_control_idx
    ON variants(parent_kind, parent_id) WHERE is_control = 1;
CREATE INDEX IF NOT EXISTS variants_parent_idx ON variants(parent_kind, parent_id);

CREATE TABLE IF NOT EXISTS rules (
    rule_id            TEXT PRIMARY KEY,
    variant_id         TEXT NOT NULL REFERENCES variants(variant_id) ON DELETE CASCADE,
    bucket_id          TEXT NOT NULL,
    distribution_type  TEXT NOT NULL
        CHECK (distribution_type IN ('percentage', 'count', 'unlimited', 'random')),
    distribution_value INTEGER,
    created_at         TEXT NOT NULL,
    UNIQUE (variant_id, bucket_id),
    CHECK ((distribution_type IN ('percentage', 'count')) = (distribution_value IS NOT NULL)),
    CHECK (distribution_type != 'percentage' OR distribution_value BETWEEN 1 AND 100),
    CHECK (distribution_type != 'count' OR distribution_value > 0)
);

CREATE INDEX IF NOT EXISTS rules_bucket_idx ON rules(bucket_id);

-- One row per bound identity. parent_kind/parent_id are copied from the
-- variant so that exclusivity across a parent's variants is a constraint,
-- not just a property of the selection algorithm.
CREATE TABLE IF NOT EXISTS assignments (
    assignment_id   TEXT PRIMARY KEY,
    variant_id      TEXT NOT NULL REFERENCES variants(variant_id) ON DELETE CASCADE,
    parent_kind     TEXT NOT NULL,
    parent_id       TEXT NOT NULL,
    bucket_id       TEXT,
    subscription_id TEXT,
    user_id         TEXT,
    buyer_cookie    TEXT,
    assigned_at     TEXT NOT NULL,
    exposed_at      TEXT,
    converted_at    TEXT,
    purchase_id     TEXT,
    CHECK ((subscription_id IS NOT NULL) + (user_id IS NOT NULL) + (buyer_cookie IS NOT NULL) = 1),
    CHECK (parent_kind = 'post' OR subscription_id IS NULL),
    CHECK ((converted_at IS NULL) = (purchase_id IS NULL)),
    UNIQUE (variant_id, subscription_id),
    UNIQUE (user_id, variant_id),
    UNIQUE (buyer_cookie, variant_id),
    UNIQUE (parent_kind, parent_id, subscription_id),
    UNIQUE (parent_kind, parent_id, user_id),
    UNIQUE (parent_kind, parent_id, buyer_cookie)
);

CREATE INDEX IF NOT EXISTS assignments_bucket_idx
    ON assignments(parent_kind, parent_id, bucket_id);
CREATE INDEX IF NOT EXISTS assignments_variant_idx ON assignments(variant_id);

PRAGMA user_version = 1;
";
