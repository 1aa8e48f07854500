//! SQL schema definitions.

/// v1: params, replay history, validators and round results.
///
/// Structured values (parameters, submissions) are stored as JSON text.
/// Prices are stored as decimal text because they do not fit an SQLite
/// integer.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Parameters
-- ============================================================

CREATE TABLE IF NOT EXISTS params (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    body TEXT NOT NULL
);

-- Snapshot written at the end of the block that changed the params
CREATE TABLE IF NOT EXISTS recent_params (
    height INTEGER PRIMARY KEY,
    body TEXT NOT NULL
);

-- ============================================================
-- Replay history
-- ============================================================

-- Accepted submissions of one block, in inclusion order
CREATE TABLE IF NOT EXISTS recent_msgs (
    height INTEGER PRIMARY KEY,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS validator_update_block (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    height INTEGER NOT NULL
);

-- ============================================================
-- Validator set
-- ============================================================

CREATE TABLE IF NOT EXISTS validators (
    address BLOB PRIMARY KEY,
    power INTEGER NOT NULL CHECK (power >= 0)
);

-- ============================================================
-- Finalized prices (append-only)
-- ============================================================

CREATE TABLE IF NOT EXISTS round_results (
    feeder_id INTEGER NOT NULL,
    round_id INTEGER NOT NULL,
    height INTEGER NOT NULL,
    value TEXT NOT NULL,
    decimal INTEGER NOT NULL,
    PRIMARY KEY (feeder_id, round_id)
);

CREATE INDEX IF NOT EXISTS idx_round_results_height
    ON round_results(feeder_id, height);
"#;

/// v2: prices of rounds that missed ThresholdB, waiting in the feeder's
/// next round. One row per feeder; `body` holds the votes as JSON.
pub const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS carried_rounds (
    feeder_id INTEGER PRIMARY KEY,
    round_id INTEGER NOT NULL,
    body TEXT NOT NULL
);
"#;
