//! Testing utilities and mock adapters.
//!
//! The mocks replace the capture and transfer collaborators so the resolver,
//! orchestrator and scheduler can be exercised without any network.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamgrab_core::testing::{CaptureScript, MockCapture, MockTransfer, TransferScript};
//!
//! let capture = MockCapture::new();
//! let transfer = MockTransfer::new();
//!
//! capture.set_script("mirror-1", CaptureScript::SoftFail("HTTP 503".into())).await;
//! transfer.push_script("mirror-2", TransferScript::Cooperative).await;
//! ```

mod mock_capture;
mod mock_transfer;

pub use mock_capture::{CaptureScript, MockCapture};
pub use mock_transfer::{MockTransfer, TransferScript};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::job::{Candidate, ContentType, CreateJobRequest};

    /// Movie request with the given candidate endpoints, ranked in order.
    pub fn movie_request(title: &str, endpoints: &[&str]) -> CreateJobRequest {
        CreateJobRequest::new(
            format!("https://example.com/watch/{}", title.to_lowercase().replace(' ', "-")),
            ContentType::Movie,
        )
        .with_name(title)
        .with_candidates(candidates(endpoints))
    }

    /// Episode request with the given candidate endpoints.
    pub fn episode_request(
        title: &str,
        season: u32,
        episode: u32,
        endpoints: &[&str],
    ) -> CreateJobRequest {
        CreateJobRequest::new(
            format!("https://example.com/watch/{}-s{}e{}", title.to_lowercase(), season, episode),
            ContentType::Episode,
        )
        .with_name(title)
        .with_episode(season, episode)
        .with_candidates(candidates(endpoints))
    }

    /// Candidates ranked by position.
    pub fn candidates(endpoints: &[&str]) -> Vec<Candidate> {
        endpoints
            .iter()
            .enumerate()
            .map(|(rank, endpoint)| Candidate::new(*endpoint, rank as u32))
            .collect()
    }
}
