//! Preview orchestration: admission, external build, artifact read, link
//! rewriting.

pub mod admission;
mod builder;
mod links;
mod types;

use std::fs;
use std::io;
use std::time::Instant;

use metrics::counter;
use thiserror::Error;
use tracing::info;

use crate::config::PreviewSettings;

pub use admission::{BuildAdmission, BuildSlot, ReservationToken};
pub use builder::{BuildPlan, EXCEPTION_MARKER};
pub use links::rewrite_links;
pub use types::{PreviewError, PreviewOutcome, PreviewRequest};

use builder::run_build;

#[derive(Debug, Error)]
pub enum PreviewInitError {
    #[error("failed to prepare scratch directory: {0}")]
    ScratchInit(io::Error),
}

/// Orchestrates one preview build per admitted request.
///
/// Owns the single process-wide [`BuildAdmission`] gate; constructed once at
/// service startup and shared by every surface (HTTP, one-shot CLI).
pub struct PreviewService {
    settings: PreviewSettings,
    admission: BuildAdmission,
}

impl PreviewService {
    pub fn new(settings: PreviewSettings) -> Result<Self, PreviewInitError> {
        fs::create_dir_all(&settings.scratch_dir).map_err(PreviewInitError::ScratchInit)?;
        let admission = BuildAdmission::new(settings.debounce);
        Ok(Self {
            settings,
            admission,
        })
    }

    /// Run the full reserve → debounce → admit → build pipeline.
    ///
    /// Never returns an error: a superseded request yields silently, and
    /// every failure class arrives as [`PreviewOutcome::Failed`] for the
    /// caller to render.
    pub async fn render(&self, request: &PreviewRequest) -> PreviewOutcome {
        let started_at = Instant::now();
        let token = self.admission.reserve();
        self.admission.debounce().await;
        let Some(slot) = self.admission.admit(token) else {
            info!(
                target = "application::preview",
                op = "preview::render",
                result = "superseded",
                document = %request.document.display(),
                "another preview is in progress; yielding"
            );
            return PreviewOutcome::Superseded;
        };

        counter!("anteprima_preview_builds_total").increment(1);
        match self.build_once(request, &slot).await {
            Ok(html) => {
                slot.complete();
                info!(
                    target = "application::preview",
                    op = "preview::render",
                    result = "ok",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    document = %request.document.display(),
                    html_bytes = html.len(),
                    "preview rendered"
                );
                PreviewOutcome::Rendered { html }
            }
            Err(error) => {
                slot.complete();
                counter!("anteprima_preview_failures_total").increment(1);
                PreviewOutcome::Failed { error }
            }
        }
    }

    async fn build_once(
        &self,
        request: &PreviewRequest,
        slot: &BuildSlot,
    ) -> Result<String, PreviewError> {
        let plan = BuildPlan::resolve(&request.document, &self.settings);
        run_build(&plan, slot).await?;

        let html = tokio::fs::read_to_string(&plan.artifact)
            .await
            .map_err(|source| PreviewError::ArtifactUnreadable {
                path: plan.artifact.clone(),
                source,
            })?;

        let fix_links = request.fix_links.unwrap_or(self.settings.fix_links);
        if fix_links {
            Ok(rewrite_links(&html, &plan.artifact, &self.settings.link_scheme))
        } else {
            Ok(html)
        }
    }
}
