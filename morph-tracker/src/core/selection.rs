/*!
Model selection page shown by `/morph` and `/morph ui`
*/

use std::collections::BTreeSet;

use morph_ledger::ModelId;
use serde::{Deserialize, Serialize};

pub const PAGE_TITLE: &str = "Morphs";
pub const UNMORPH_LABEL: &str = "Unmorph";

/// What a page entry does when activated. The host hands this back unchanged when
/// the player picks the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model")]
pub enum SelectionAction {
    Unmorph,
    Apply(ModelId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionEntry {
    pub label: String,
    pub action: SelectionAction,
}

/// Renderer-agnostic page description: an unmorph entry followed by every unlocked model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPage {
    pub title: String,
    pub entries: Vec<SelectionEntry>,
}

impl SelectionPage {
    pub fn build(unlocked: &BTreeSet<ModelId>) -> Self {
        let unmorph = SelectionEntry {
            label: UNMORPH_LABEL.to_string(),
            action: SelectionAction::Unmorph,
        };
        let models = unlocked.iter().map(|model| SelectionEntry {
            label: model.to_string(),
            action: SelectionAction::Apply(model.clone()),
        });

        Self {
            title: PAGE_TITLE.to_string(),
            entries: std::iter::once(unmorph).chain(models).collect(),
        }
    }

    pub fn action_at(&self, index: usize) -> Option<&SelectionAction> {
        self.entries.get(index).map(|entry| &entry.action)
    }
}
