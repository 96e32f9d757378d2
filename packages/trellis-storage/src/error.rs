/// Everything this crate surfaces is a database failure; callers layer their
/// own not-found and validation semantics on top.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] pub sqlx::Error);
