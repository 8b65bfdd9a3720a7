// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Handles used throughout the translation layer.
//!
//! Control ids are derived from the control's name, so callers on any thread can compute them
//! without access to the translation layer. Whether an id is actually registered is only known
//! to the control data processor.

use std::fmt;

use serde::Serialize;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes a control name into a 32-bit id. Names are case-insensitive.
pub const fn hash_name(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i].to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// The kind of a control, used for error reporting and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ControlKind {
    Trigger,
    Rtpc,
    Switch,
    SwitchState,
    Preload,
    Environment,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlKind::Trigger => "trigger",
            ControlKind::Rtpc => "rtpc",
            ControlKind::Switch => "switch",
            ControlKind::SwitchState => "switch state",
            ControlKind::Preload => "preload",
            ControlKind::Environment => "environment",
        };
        f.write_str(name)
    }
}

macro_rules! control_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(u32);

        impl $name {
            /// The id that never refers to a registered control.
            pub const INVALID: $name = $name(0);

            /// Derives the id for the given control name.
            pub const fn from_name(name: &str) -> $name {
                $name(hash_name(name))
            }

            /// Wraps a raw id value.
            pub const fn from_raw(raw: u32) -> $name {
                $name(raw)
            }

            /// Returns the raw id value.
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// The control kind this id namespace belongs to.
            pub const fn kind() -> ControlKind {
                $kind
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }
    };
}

control_id!(
    /// Identifies a trigger.
    TriggerId,
    ControlKind::Trigger
);
control_id!(
    /// Identifies a real-time parameter control.
    RtpcId,
    ControlKind::Rtpc
);
control_id!(
    /// Identifies a switch.
    SwitchId,
    ControlKind::Switch
);
control_id!(
    /// Identifies a state of a switch. State ids are only unique within their switch.
    SwitchStateId,
    ControlKind::SwitchState
);
control_id!(
    /// Identifies a preload request.
    PreloadId,
    ControlKind::Preload
);
control_id!(
    /// Identifies an environment.
    EnvironmentId,
    ControlKind::Environment
);

/// Identifies an audio object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(u32);

impl ObjectId {
    /// The global object, created at initialization and never released.
    pub const GLOBAL: ObjectId = ObjectId(1);

    pub const fn from_raw(raw: u32) -> ObjectId {
        ObjectId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn is_global(self) -> bool {
        self == ObjectId::GLOBAL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object:{}", self.0)
    }
}

/// Identifies a listener. Listener handles come from a pool separate from objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(u32);

impl ListenerId {
    pub const fn from_raw(raw: u32) -> ListenerId {
        ListenerId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Identifies an audio input source. Source ids are handed out in sequence and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(u32);

impl SourceId {
    pub const fn from_raw(raw: u32) -> SourceId {
        SourceId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Identifies one activation of a trigger on an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TriggerInstanceId(u64);

impl TriggerInstanceId {
    pub const fn from_raw(raw: u64) -> TriggerInstanceId {
        TriggerInstanceId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TriggerInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

/// Identifies one event instance: the `entry`-th implementation of the trigger activated as
/// `instance` on `object`. This is what the middleware reports back on completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventKey {
    pub object: ObjectId,
    pub instance: TriggerInstanceId,
    pub entry: u16,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.object, self.instance, self.entry)
    }
}

/// Opaque caller-supplied token used to group requests, e.g. to stop every trigger a given
/// game entity started on a shared object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerId(pub u64);

/// Lifetime classification of loaded control and preload data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DataScope {
    Global,
    LevelSpecific,
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataScope::Global => f.write_str("global"),
            DataScope::LevelSpecific => f.write_str("level"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable_and_case_insensitive() {
        assert_eq!(
            TriggerId::from_name("Explosion"),
            TriggerId::from_name("Explosion")
        );
        assert_eq!(
            TriggerId::from_name("Explosion"),
            TriggerId::from_name("explosion")
        );
        assert_ne!(
            TriggerId::from_name("Explosion"),
            TriggerId::from_name("Explosions")
        );
    }

    #[test]
    fn test_known_hash_value() {
        // Standard FNV-1a test vectors.
        assert_eq!(hash_name(""), 0x811c_9dc5);
        assert_eq!(hash_name("a"), 0xe40c_292c);
        assert_eq!(hash_name("A"), 0xe40c_292c);
    }

    #[test]
    fn test_global_object() {
        assert!(ObjectId::GLOBAL.is_global());
        assert!(!ObjectId::from_raw(2).is_global());
    }
}
