//! Server launch, inspection and termination.
//!
//! Servers are created stopped with a single block volume next to the image
//! root volume, then powered on. A server that never leaves the stopped state
//! is discarded together with its volumes.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{BlockDeviceSpec, InstanceState, InstanceStatus, LaunchRequest};
use crate::units::gib_to_bytes;

use super::http::{NOT_FOUND, send, send_json};
use super::{ScalewayBackend, ScalewayBackendError, resource_tags};

const VOLUME_TYPE_BLOCK: &str = "b_ssd";
const ACTION_POWER_ON: &str = "poweron";
const ACTION_TERMINATE: &str = "terminate";

#[derive(Debug, Eq, PartialEq, Serialize)]
struct VolumeTemplate {
    name: String,
    size: u64,
    volume_type: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateServerRequest<'a> {
    name: &'a str,
    commercial_type: &'a str,
    image: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_group: Option<&'a str>,
    dynamic_ip_required: bool,
    routed_ip_enabled: bool,
    tags: Vec<String>,
    volumes: BTreeMap<String, VolumeTemplate>,
}

#[derive(Deserialize)]
struct ServerResponse {
    server: Server,
}

#[derive(Debug, Deserialize)]
struct Server {
    id: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    allowed_actions: Vec<String>,
    #[serde(default)]
    public_ip: Option<PublicIp>,
    #[serde(default)]
    public_ips: Vec<PublicIp>,
    #[serde(default)]
    volumes: BTreeMap<String, AttachedVolume>,
}

#[derive(Debug, Deserialize)]
struct PublicIp {
    address: String,
}

#[derive(Debug, Deserialize)]
struct AttachedVolume {
    id: String,
}

impl Server {
    fn allows(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }

    fn status(&self) -> InstanceStatus {
        let mut slots: Vec<(u32, &str)> = self
            .volumes
            .iter()
            .filter_map(|(slot, volume)| {
                slot.parse::<u32>()
                    .ok()
                    .map(|index| (index, volume.id.as_str()))
            })
            .collect();
        slots.sort_unstable_by_key(|(index, _)| *index);
        InstanceStatus {
            state: map_state(&self.state),
            public_address: self
                .public_ip
                .as_ref()
                .or_else(|| self.public_ips.first())
                .map(|ip| ip.address.clone()),
            block_devices: slots.into_iter().map(|(_, id)| id.to_owned()).collect(),
        }
    }
}

fn map_state(state: &str) -> InstanceState {
    match state {
        "starting" => InstanceState::Pending,
        "running" => InstanceState::Running,
        "stopping" => InstanceState::ShuttingDown,
        "stopped" | "stopped in place" => InstanceState::Stopped,
        other => InstanceState::Other(other.to_owned()),
    }
}

fn volume_templates(
    server_name: &str,
    devices: &[BlockDeviceSpec],
) -> Result<BTreeMap<String, VolumeTemplate>, ScalewayBackendError> {
    let mut volumes = BTreeMap::new();
    for (offset, device) in devices.iter().enumerate() {
        if device.encrypted {
            return Err(ScalewayBackendError::Validation(String::from(
                "block_devices.encrypted is not supported",
            )));
        }
        if !device.delete_on_termination {
            return Err(ScalewayBackendError::Validation(String::from(
                "block_devices.delete_on_termination must be set",
            )));
        }
        let slot = offset.saturating_add(1);
        volumes.insert(
            slot.to_string(),
            VolumeTemplate {
                name: format!("{server_name}-vol{slot}"),
                size: gib_to_bytes(device.size_gb),
                volume_type: VOLUME_TYPE_BLOCK,
            },
        );
    }
    Ok(volumes)
}

impl ScalewayBackend {
    pub(super) async fn launch_server(
        &self,
        request: &LaunchRequest,
    ) -> Result<String, ScalewayBackendError> {
        request.validate()?;
        let security_group = match request.network_access_ids.as_slice() {
            [] => None,
            [single] => Some(single.as_str()),
            _ => {
                return Err(ScalewayBackendError::Validation(String::from(
                    "network_access_ids accepts a single security group",
                )));
            }
        };
        let volumes = volume_templates(&request.name, &request.block_devices)?;
        let image_id = self.resolve_image_id(&request.image).await?;

        let payload = CreateServerRequest {
            name: &request.name,
            commercial_type: &request.instance_type,
            image: &image_id,
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            security_group,
            dynamic_ip_required: true,
            routed_ip_enabled: true,
            tags: resource_tags(),
            volumes,
        };
        let url = self.instance_url("servers");
        let created: ServerResponse = match send_json(
            self.request(Method::POST, &url).json(&payload),
        )
        .await
        {
            Ok(created) => created,
            Err(ScalewayBackendError::Http { status, message })
                if status < 500 && message.contains("commercial_type") =>
            {
                return Err(ScalewayBackendError::InstanceTypeUnavailable {
                    instance_type: request.instance_type.clone(),
                    zone: self.config.default_zone.clone(),
                });
            }
            Err(err) => return Err(err),
        };
        let server = created.server;
        debug!(instance_id = %server.id, state = %server.state, "server created");

        if server.state == "running" {
            return Ok(server.id);
        }
        let powered = self
            .api
            .perform_instance_action_async(&self.config.default_zone, &server.id, ACTION_POWER_ON)
            .await;
        match powered {
            Ok(_) => Ok(server.id),
            Err(err) => {
                warn!(instance_id = %server.id, error = %err, "power on failed; discarding server");
                if let Err(cleanup) = self.discard_server(&server).await {
                    warn!(instance_id = %server.id, error = %cleanup, "failed to discard server");
                }
                Err(err.into())
            }
        }
    }

    async fn fetch_server(
        &self,
        instance_id: &str,
    ) -> Result<Option<Server>, ScalewayBackendError> {
        let url = self.instance_url(&format!("servers/{instance_id}"));
        match send_json::<ServerResponse>(self.request(Method::GET, &url)).await {
            Ok(found) => Ok(Some(found.server)),
            Err(ScalewayBackendError::Http {
                status: NOT_FOUND, ..
            }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub(super) async fn describe_server(
        &self,
        instance_id: &str,
    ) -> Result<InstanceStatus, ScalewayBackendError> {
        Ok(self.fetch_server(instance_id).await?.map_or_else(
            || InstanceStatus {
                state: InstanceState::Terminated,
                public_address: None,
                block_devices: Vec::new(),
            },
            |server| server.status(),
        ))
    }

    pub(super) async fn terminate_server(
        &self,
        instance_id: &str,
    ) -> Result<(), ScalewayBackendError> {
        let Some(server) = self.fetch_server(instance_id).await? else {
            return Ok(());
        };
        if server.allows(ACTION_TERMINATE) {
            self.api
                .perform_instance_action_async(
                    &self.config.default_zone,
                    instance_id,
                    ACTION_TERMINATE,
                )
                .await?;
            return Ok(());
        }
        if server.state == "stopped" {
            return self.discard_server(&server).await;
        }
        Err(ScalewayBackendError::Provider {
            message: format!(
                "instance {instance_id} in state {} cannot be terminated",
                server.state
            ),
        })
    }

    /// Deletes a stopped server and then every volume it held.
    async fn discard_server(&self, server: &Server) -> Result<(), ScalewayBackendError> {
        let url = self.instance_url(&format!("servers/{}", server.id));
        send(self.request(Method::DELETE, &url)).await?;
        for volume in server.volumes.values() {
            let volume_url = self.instance_url(&format!("volumes/{}", volume.id));
            match send(self.request(Method::DELETE, &volume_url)).await {
                Ok(_)
                | Err(ScalewayBackendError::Http {
                    status: NOT_FOUND, ..
                }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
