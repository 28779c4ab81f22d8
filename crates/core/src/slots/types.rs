use serde::{Deserialize, Serialize};

/// A named desired-quality assignment.
///
/// Slots are configured globally and may be overridden per media target.
/// Several slots on one target keep several quality tiers side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub profile_id: String,
    /// Display order; lower slots are matched first.
    #[serde(default)]
    pub order: u32,
}

fn default_true() -> bool {
    true
}

/// Per-target adjustment of a global slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOverride {
    pub slot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

/// Immutable copy of a slot taken when a grab is made, so later edits to
/// the slot do not change what the grab was for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub slot_id: String,
    pub slot_name: String,
    pub profile_id: String,
}

impl From<&Slot> for SlotSnapshot {
    fn from(slot: &Slot) -> Self {
        Self {
            slot_id: slot.id.clone(),
            slot_name: slot.name.clone(),
            profile_id: slot.profile_id.clone(),
        }
    }
}

/// Apply per-target overrides to the global slot list, sorted by order.
pub fn effective_slots(global: &[Slot], overrides: &[SlotOverride]) -> Vec<Slot> {
    let mut slots: Vec<Slot> = global
        .iter()
        .map(|slot| {
            let mut slot = slot.clone();
            if let Some(o) = overrides.iter().find(|o| o.slot_id == slot.id) {
                if let Some(enabled) = o.enabled {
                    slot.enabled = enabled;
                }
                if let Some(profile_id) = &o.profile_id {
                    slot.profile_id = profile_id.clone();
                }
            }
            slot
        })
        .collect();
    slots.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: &str, order: u32) -> Slot {
        Slot {
            id: id.into(),
            name: id.to_uppercase(),
            enabled: true,
            profile_id: format!("{}-profile", id),
            order,
        }
    }

    #[test]
    fn test_effective_slots_applies_overrides() {
        let global = vec![slot("uhd", 2), slot("hd", 1)];
        let overrides = vec![SlotOverride {
            slot_id: "uhd".into(),
            enabled: Some(false),
            profile_id: Some("custom".into()),
        }];

        let slots = effective_slots(&global, &overrides);
        assert_eq!(slots[0].id, "hd");
        assert!(slots[0].enabled);
        assert_eq!(slots[1].id, "uhd");
        assert!(!slots[1].enabled);
        assert_eq!(slots[1].profile_id, "custom");
    }

    #[test]
    fn test_override_for_unknown_slot_is_ignored() {
        let global = vec![slot("hd", 0)];
        let overrides = vec![SlotOverride {
            slot_id: "gone".into(),
            enabled: Some(false),
            profile_id: None,
        }];
        let slots = effective_slots(&global, &overrides);
        assert_eq!(slots.len(), 1);
        assert!(slots[0].enabled);
    }

    #[test]
    fn test_slot_deserialize_defaults() {
        let s: Slot = toml::from_str(
            r#"
id = "hd"
name = "HD"
profile_id = "hd-1080"
"#,
        )
        .unwrap();
        assert!(s.enabled);
        assert_eq!(s.order, 0);
    }
}
