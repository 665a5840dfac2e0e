//! Project and variant lifecycle statuses.
//!
//! Each enum variant's discriminant is the SMALLINT id persisted by the
//! storage layer. Transition rules live here so that every store
//! implementation enforces the same state machine.

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID.
            pub fn from_id(id: StatusId) -> Result<Self, CoreError> {
                match id {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} id {other}",
                        stringify!($name)
                    ))),
                }
            }

            /// Lower-case name used in logs and the progress read model.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Generation attempt lifecycle: `pending -> generating -> {completed, failed}`.
    VariantStatus {
        Pending = 1 => "pending",
        Generating = 2 => "generating",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
    }
}

define_status_enum! {
    /// Project run lifecycle.
    ProjectStatus {
        /// Created (or recovered after a restart) and waiting for a run.
        Pending = 1 => "pending",
        Generating = 2 => "generating",
        Completed = 3 => "completed",
        Cancelled = 4 => "cancelled",
    }
}

impl VariantStatus {
    /// `completed` and `failed` are terminal; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `pending -> failed` is allowed so that cancelled runs can close out
    /// variants that were never dispatched.
    pub fn can_transition_to(self, next: VariantStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Generating)
                | (Self::Pending, Self::Failed)
                | (Self::Generating, Self::Completed)
                | (Self::Generating, Self::Failed)
        )
    }
}

impl ProjectStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}
