//! Flatten module
//!
//! Converts nested edge/node payloads into flat records.
//!
//! # Overview
//!
//! - Keys become snake_case; one-to-one objects become `parent__child` columns
//! - `edges[].node`, `nodes[]` and arrays become child tables named
//!   `<table>__<field>`, each row linked to its parent's key
//! - Money stays textual, quantities become integers, timestamps are
//!   rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ`
//! - Fields on the drop list are removed at every depth
//!
//! Output depends only on the payload and the injected `_extracted_at`.

mod flattener;
mod naming;
mod types;

pub use flattener::Flattener;
pub use naming::{format_timestamp, normalize_timestamp, parse_timestamp, snake_case};
pub use types::{
    ChildRecordSet, Fields, FlatRecord, FlattenRules, Row, Scalar, DEFAULT_PARENT_LINK,
    EXTRACTED_AT, RECORD_KEY,
};
