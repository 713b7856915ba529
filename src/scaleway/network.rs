//! Security group management for the copy instance.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::IngressRule;

use super::http::{NOT_FOUND, send, send_json};
use super::{ScalewayBackend, ScalewayBackendError, resource_tags};

const INBOUND_DEFAULT_POLICY: &str = "drop";
const OUTBOUND_DEFAULT_POLICY: &str = "accept";

#[derive(Serialize)]
struct CreateSecurityGroupRequest<'a> {
    name: &'a str,
    description: String,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    stateful: bool,
    inbound_default_policy: &'static str,
    outbound_default_policy: &'static str,
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct SecurityGroupResponse {
    security_group: SecurityGroup,
}

#[derive(Deserialize)]
struct ListSecurityGroupsResponse {
    #[serde(default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Deserialize)]
struct SecurityGroup {
    id: String,
    name: String,
}

#[derive(Debug, Eq, PartialEq, Serialize)]
struct CreateRuleRequest {
    protocol: &'static str,
    direction: &'static str,
    action: &'static str,
    ip_range: String,
    dest_port_from: u16,
}

impl From<&IngressRule> for CreateRuleRequest {
    fn from(rule: &IngressRule) -> Self {
        Self {
            protocol: rule.protocol.as_str(),
            direction: "inbound",
            action: "accept",
            ip_range: rule.source_range.clone(),
            dest_port_from: rule.port,
        }
    }
}

impl ScalewayBackend {
    pub(super) async fn create_security_group(
        &self,
        name: &str,
    ) -> Result<String, ScalewayBackendError> {
        let payload = CreateSecurityGroupRequest {
            name,
            description: format!("Temporary access for {name}"),
            project: &self.config.default_project_id,
            organization: self.config.default_organization_id.as_deref(),
            stateful: true,
            inbound_default_policy: INBOUND_DEFAULT_POLICY,
            outbound_default_policy: OUTBOUND_DEFAULT_POLICY,
            tags: resource_tags(),
        };
        let url = self.instance_url("security_groups");
        let created: SecurityGroupResponse =
            send_json(self.request(Method::POST, &url).json(&payload)).await?;
        Ok(created.security_group.id)
    }

    pub(super) async fn add_security_group_rule(
        &self,
        group_id: &str,
        rule: &IngressRule,
    ) -> Result<(), ScalewayBackendError> {
        let url = self.instance_url(&format!("security_groups/{group_id}/rules"));
        let payload = CreateRuleRequest::from(rule);
        send(self.request(Method::POST, &url).json(&payload)).await?;
        Ok(())
    }

    pub(super) async fn find_security_group(
        &self,
        name: &str,
    ) -> Result<Option<String>, ScalewayBackendError> {
        let mut matching = self.security_groups_named(name).await?;
        Ok(matching.pop().map(|group| group.id))
    }

    pub(super) async fn delete_security_groups(
        &self,
        name: &str,
    ) -> Result<(), ScalewayBackendError> {
        let matching = self.security_groups_named(name).await?;
        if matching.is_empty() {
            return Err(ScalewayBackendError::NotFound {
                kind: "security group",
                name: name.to_owned(),
            });
        }

        for group in matching {
            let group_url = self.instance_url(&format!("security_groups/{}", group.id));
            match send(self.request(Method::DELETE, &group_url)).await {
                Ok(_) => debug!(group_id = %group.id, name, "deleted security group"),
                Err(ScalewayBackendError::Http {
                    status: NOT_FOUND, ..
                }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn security_groups_named(
        &self,
        name: &str,
    ) -> Result<Vec<SecurityGroup>, ScalewayBackendError> {
        let url = self.instance_url("security_groups");
        let request = self.request(Method::GET, &url).query(&[
            ("name", name),
            ("project", self.config.default_project_id.as_str()),
        ]);
        let listed: ListSecurityGroupsResponse = send_json(request).await?;
        Ok(exact_matches(listed, name))
    }
}

/// The listing filter matches substrings; only exact names count.
fn exact_matches(listed: ListSecurityGroupsResponse, name: &str) -> Vec<SecurityGroup> {
    listed
        .security_groups
        .into_iter()
        .filter(|group| group.name == name)
        .collect()
}
