//! Resolution of image labels to image identifiers.

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use uuid::Uuid;

use super::{ScalewayBackend, ScalewayBackendError};

const AVAILABLE: &str = "available";

impl ScalewayBackend {
    /// Resolves `image` to an identifier. Identifiers pass through untouched;
    /// labels are looked up in the project first, then among public images.
    pub(super) async fn resolve_image_id(
        &self,
        image: &str,
    ) -> Result<String, ScalewayBackendError> {
        if Uuid::parse_str(image).is_ok() {
            return Ok(image.to_owned());
        }

        let zone = self.config.default_zone.as_str();
        let arch = self.config.default_architecture.as_str();
        let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
            .public(true)
            .project(&self.config.default_project_id)
            .name(image)
            .arch(arch);
        if let Some(org) = &self.config.default_organization_id {
            scoped = scoped.organization(org);
        }
        let project_images = scoped.run_async().await?;

        let candidates = if project_images.is_empty() {
            ScalewayListInstanceImagesBuilder::new(self.api.clone(), zone)
                .public(true)
                .name(image)
                .arch(arch)
                .run_async()
                .await?
        } else {
            project_images
        };

        select_image_id(candidates, image, arch).ok_or_else(|| {
            ScalewayBackendError::ImageNotFound {
                label: image.to_owned(),
                arch: arch.to_owned(),
                zone: zone.to_owned(),
            }
        })
    }
}

/// Picks the newest available image matching `arch`.
pub(super) fn select_image_id(
    candidates: Vec<ScalewayImage>,
    label: &str,
    arch: &str,
) -> Option<String> {
    candidates
        .into_iter()
        .filter(|image| image.arch == arch && image.state == AVAILABLE)
        .filter(|image| image.name.is_empty() || image.name == label)
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
}
