use podwright_core::{PodwrightError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declares a closed string enum whose wire form is the cluster's own spelling
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PodwrightError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(PodwrightError::translation_failed(
                        stringify!($name),
                        format!("unknown value '{}'", other),
                    )),
                }
            }
        }
    };
}

string_enum! {
    /// Pod restart policy
    RestartPolicy {
        Always => "Always",
        OnFailure => "OnFailure",
        Never => "Never",
    }
}

string_enum! {
    /// Image pull policy of a container
    PullPolicy {
        Always => "Always",
        IfNotPresent => "IfNotPresent",
        Never => "Never",
    }
}

string_enum! {
    /// How the termination message of a container is populated
    TerminationMessagePolicy {
        File => "File",
        FallbackToLogsOnError => "FallbackToLogsOnError",
    }
}

string_enum! {
    MountPropagation {
        None => "None",
        HostToContainer => "HostToContainer",
        Bidirectional => "Bidirectional",
    }
}

string_enum! {
    DnsPolicy {
        ClusterFirst => "ClusterFirst",
        ClusterFirstWithHostNet => "ClusterFirstWithHostNet",
        Default => "Default",
        None => "None",
    }
}

string_enum! {
    FsGroupChangePolicy {
        OnRootMismatch => "OnRootMismatch",
        Always => "Always",
    }
}

string_enum! {
    SeccompProfileType {
        Unconfined => "Unconfined",
        RuntimeDefault => "RuntimeDefault",
        Localhost => "Localhost",
    }
}

string_enum! {
    /// What the scheduler does with a pod that cannot satisfy a spread constraint
    WhenUnsatisfiable {
        DoNotSchedule => "DoNotSchedule",
        ScheduleAnyway => "ScheduleAnyway",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(RestartPolicy::OnFailure.as_str(), "OnFailure");
        assert_eq!(MountPropagation::None.to_string(), "None");
        assert_eq!(
            "FallbackToLogsOnError".parse::<TerminationMessagePolicy>().unwrap(),
            TerminationMessagePolicy::FallbackToLogsOnError
        );
    }

    #[test]
    fn test_unknown_value_is_translation_error() {
        let err = "Sometimes".parse::<RestartPolicy>().unwrap_err();
        assert!(matches!(err, PodwrightError::TranslationFailed { .. }));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&DnsPolicy::ClusterFirstWithHostNet).unwrap();
        assert_eq!(json, "\"ClusterFirstWithHostNet\"");
        let policy: PullPolicy = serde_json::from_str("\"IfNotPresent\"").unwrap();
        assert_eq!(policy, PullPolicy::IfNotPresent);
    }
}
