use serde::{Deserialize, Serialize};

use crate::message::Point;

/// The control protocol spoken over a UDF transport (spec.md §6, §4.9 C9):
/// one JSON value per frame, length-prefixed on the wire (see
/// [`super::bridge`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdfRequest {
    Init { options: serde_json::Value },
    Point { point: Point },
    Batch { points: Vec<Point> },
    Snapshot,
    Restore { state: Vec<u8> },
    Terminate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdfResponse {
    InitAck,
    Point { point: Point },
    Batch { points: Vec<Point> },
    SnapshotData { state: Vec<u8> },
    RestoreAck,
    Error { message: String },
}
