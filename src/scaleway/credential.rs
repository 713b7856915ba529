//! SSH key registration through the IAM API.
//!
//! Keys registered in a project are injected into every instance booted in
//! that project, so registering the key is all a launch needs.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::KeyPair;

use super::http::{IAM_API_BASE, NOT_FOUND, send, send_json};
use super::{ScalewayBackend, ScalewayBackendError};

#[derive(Debug, Deserialize)]
struct ListSshKeysResponse {
    #[serde(default)]
    ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct CreateSshKeyRequest<'a> {
    name: &'a str,
    public_key: &'a str,
    project_id: &'a str,
}

impl ScalewayBackend {
    pub(super) async fn remove_ssh_keys(&self, name: &str) -> Result<(), ScalewayBackendError> {
        let url = format!("{IAM_API_BASE}/ssh-keys");
        let request = self.request(Method::GET, &url).query(&[
            ("name", name),
            ("project_id", self.config.default_project_id.as_str()),
        ]);
        let listed: ListSshKeysResponse = send_json(request).await?;

        for key in listed.ssh_keys.iter().filter(|key| key.name == name) {
            let key_url = format!("{IAM_API_BASE}/ssh-keys/{}", key.id);
            match send(self.request(Method::DELETE, &key_url)).await {
                Ok(_) => debug!(key_id = %key.id, name, "deleted ssh key"),
                Err(ScalewayBackendError::Http {
                    status: NOT_FOUND, ..
                }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub(super) async fn register_ssh_key(
        &self,
        name: &str,
    ) -> Result<KeyPair, ScalewayBackendError> {
        let generated = self.keygen.generate(name)?;
        let url = format!("{IAM_API_BASE}/ssh-keys");
        let payload = CreateSshKeyRequest {
            name,
            public_key: &generated.public_key,
            project_id: &self.config.default_project_id,
        };
        let created: SshKey = send_json(self.request(Method::POST, &url).json(&payload)).await?;
        Ok(KeyPair {
            id: created.id,
            name: created.name,
            private_key: generated.private_key.into_bytes(),
        })
    }
}
