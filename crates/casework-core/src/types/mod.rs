//! Workspace data model
//!
//! A workspace exclusively owns every child record below; nothing here is
//! mutated outside a committed [`crate::store::ChangeSet`].

mod entities;
mod state;
mod workspace;

pub use entities::*;
pub use state::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                #[must_use]
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl FromStr for $name {
                type Err = uuid::Error;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(s).map(Self)
                }
            }
        )+
    };
}

uuid_id! {
    /// Workspace identifier
    WorkspaceId,
    FactId,
    ContextId,
    ObligationId,
    MissingElementId,
    RiskId,
    ActionId,
    TraceId,
    TransitionId,
}
