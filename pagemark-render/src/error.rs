use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The rendering engine could not be brought up. Interactive annotation
    /// is unavailable for the rest of the session.
    #[error("rendering engine unavailable: {0:#}")]
    Dependency(anyhow::Error),
    #[error("failed to render page {page}: {cause:#}")]
    Page { page: usize, cause: anyhow::Error },
    #[error("page {0} does not exist")]
    NoSuchPage(usize),
}
