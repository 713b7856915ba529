//! Block volume snapshots.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::backend::SnapshotRecord;

use super::http::send_json;
use super::{ScalewayBackend, ScalewayBackendError, resource_tags};

#[derive(Serialize)]
struct CreateSnapshotRequest<'a> {
    name: &'a str,
    volume_id: &'a str,
    project: &'a str,
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct SnapshotResponse {
    snapshot: Snapshot,
}

#[derive(Deserialize)]
struct Snapshot {
    id: String,
    #[serde(default)]
    state: String,
}

impl ScalewayBackend {
    pub(super) async fn snapshot_volume(
        &self,
        volume_id: &str,
        description: &str,
    ) -> Result<SnapshotRecord, ScalewayBackendError> {
        let payload = CreateSnapshotRequest {
            name: description,
            volume_id,
            project: &self.config.default_project_id,
            tags: resource_tags(),
        };
        let url = self.instance_url("snapshots");
        let created: SnapshotResponse =
            send_json(self.request(Method::POST, &url).json(&payload)).await?;
        Ok(SnapshotRecord {
            id: created.snapshot.id,
            description: description.to_owned(),
            state: created.snapshot.state,
        })
    }
}
