//! Behavioural scenarios for `sharesnap run` against the in-memory cloud.

mod backup;
