//! Side effects: modifiers attached to actions.

use std::any::Any;
use std::collections::BTreeSet;

/// A modifier riding on an action (e.g. `:flags` on a store).
///
/// Side effects of the same kind merge when duplicate actions collapse;
/// kinds are distinguished by `name`.
pub trait SideEffect: std::fmt::Debug + Send {
    /// Kind name, unique per side-effect definition.
    fn name(&self) -> &'static str;

    /// Downcast support for actions that consume specific kinds.
    fn as_any(&self) -> &dyn Any;

    /// Clone into a new box (implicit side effects are applied by copy).
    fn dup(&self) -> Box<dyn SideEffect>;

    /// Merge `other` into `self`. Returns `false` when the kinds differ
    /// and no merge happened.
    fn merge(&mut self, other: &dyn SideEffect) -> bool;

    /// One human-readable line for the dry-run plan.
    fn describe(&self) -> String;
}

/// Flag and keyword adjustments applied when a message is filed.
///
/// `set` replaces the flag list outright, `add`/`remove` adjust it; the
/// three resolve in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagsEffect {
    set: Option<BTreeSet<String>>,
    add: BTreeSet<String>,
    remove: BTreeSet<String>,
}

impl FlagsEffect {
    /// Kind name shared with the operand parser.
    pub const NAME: &'static str = "flags";

    /// Effect that replaces the flag list with `flags`.
    #[must_use]
    pub fn set(flags: &[String]) -> Self {
        Self {
            set: Some(flags.iter().cloned().collect()),
            add: BTreeSet::new(),
            remove: BTreeSet::new(),
        }
    }

    /// Effect that adds `flags`.
    #[must_use]
    pub fn add(flags: &[String]) -> Self {
        Self {
            set: None,
            add: flags.iter().cloned().collect(),
            remove: BTreeSet::new(),
        }
    }

    /// Effect that removes `flags`.
    #[must_use]
    pub fn remove(flags: &[String]) -> Self {
        Self {
            set: None,
            add: BTreeSet::new(),
            remove: flags.iter().cloned().collect(),
        }
    }

    /// The flag list an action should apply.
    #[must_use]
    pub fn resolve(&self) -> Vec<String> {
        let mut flags = self.set.clone().unwrap_or_default();
        flags.extend(self.add.iter().cloned());
        for flag in &self.remove {
            flags.remove(flag);
        }
        flags.into_iter().collect()
    }
}

impl SideEffect for FlagsEffect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dup(&self) -> Box<dyn SideEffect> {
        Box::new(self.clone())
    }

    fn merge(&mut self, other: &dyn SideEffect) -> bool {
        let Some(other) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };
        // Keyword sets union; an explicit replacement list unions too so
        // collapsing duplicate actions never silently drops flags.
        match (&mut self.set, &other.set) {
            (Some(mine), Some(theirs)) => mine.extend(theirs.iter().cloned()),
            (None, Some(theirs)) => self.set = Some(theirs.clone()),
            _ => {}
        }
        self.add.extend(other.add.iter().cloned());
        self.remove.extend(other.remove.iter().cloned());
        true
    }

    fn describe(&self) -> String {
        format!("add IMAP flags: {}", self.resolve().join(" "))
    }
}

/// Resolve the flag list carried by a side-effect slice, when any.
#[must_use]
pub fn resolve_flags(side_effects: &[Box<dyn SideEffect>]) -> Vec<String> {
    for effect in side_effects {
        if let Some(flags) = effect.as_any().downcast_ref::<FlagsEffect>() {
            return flags.resolve();
        }
    }
    Vec::new()
}
