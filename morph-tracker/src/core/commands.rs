/*!
`/morph` command parsing and execution
*/

use std::sync::Arc;

use morph_ledger::{ModelId, PlayerId, UnlockLedger};
use tracing::{info, warn};

use crate::core::host::{EntityRef, Host, Message, World};
use crate::core::morph::{MorphApplier, UnmorphOutcome};
use crate::core::selection::{SelectionAction, SelectionPage};

pub const USAGE: &str = "Usage: /morph [ui|list|unmorph|unlock|<id>]";
pub const PERMISSION_DENIED: &str = "You do not have permission to use this command.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MorphCommand {
    OpenUi,
    Help,
    List,
    Unmorph,
    Unlock(ModelId),
    Apply(ModelId),
}

impl MorphCommand {
    /// Parse the raw input. A leading `morph` token is skipped, so both the full
    /// command line and just its arguments are accepted.
    pub fn parse(input: &str) -> Self {
        let mut tokens = input.split_whitespace().peekable();
        if tokens.peek().is_some_and(|t| t.eq_ignore_ascii_case("morph")) {
            tokens.next();
        }

        let Some(verb) = tokens.next() else {
            return Self::OpenUi;
        };
        if verb.eq_ignore_ascii_case("help") || verb.eq_ignore_ascii_case("--help") {
            return Self::Help;
        }

        match verb {
            "list" => Self::List,
            "ui" => Self::OpenUi,
            "unmorph" => Self::Unmorph,
            "unlock" => match tokens.next() {
                Some(id) => Self::Unlock(ModelId::from(id)),
                None => Self::Help,
            },
            id => Self::Apply(ModelId::from(id)),
        }
    }
}

/// Work to schedule on the sender's world once the command itself has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    FinishUnmorph(EntityRef),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResponse {
    pub replies: Vec<Message>,
    pub follow_up: Option<FollowUp>,
}

impl CommandResponse {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![Message::raw(text)],
            follow_up: None,
        }
    }
}

/// Executes commands and page selections against the ledger. Runs on the sender's
/// world worker.
pub struct CommandDispatcher {
    ledger: Arc<UnlockLedger>,
    applier: Arc<MorphApplier>,
    host: Arc<dyn Host>,
    unlock_permission: String,
}

impl CommandDispatcher {
    pub fn new(
        ledger: Arc<UnlockLedger>,
        applier: Arc<MorphApplier>,
        host: Arc<dyn Host>,
        unlock_permission: String,
    ) -> Self {
        Self {
            ledger,
            applier,
            host,
            unlock_permission,
        }
    }

    pub fn execute(
        &self,
        world: &dyn World,
        player: PlayerId,
        entity: EntityRef,
        command: MorphCommand,
    ) -> CommandResponse {
        match command {
            MorphCommand::Help => CommandResponse::reply(USAGE),
            MorphCommand::OpenUi => self.open_page(player),
            MorphCommand::List => {
                let models: Vec<String> = self
                    .ledger
                    .list_unlocked(&player)
                    .iter()
                    .map(ModelId::to_string)
                    .collect();
                CommandResponse::reply(format!("Morphs: {}", models.join(", ")))
            }
            MorphCommand::Unmorph => self.unmorph(world, entity),
            MorphCommand::Unlock(model) => {
                if !self.host.has_permission(&player, &self.unlock_permission) {
                    return CommandResponse::reply(PERMISSION_DENIED);
                }
                if self.ledger.unlock(player, model.clone()) {
                    info!("Granted {} to {} by command", model, player);
                    CommandResponse::reply(format!("Unlocked {model}"))
                } else {
                    CommandResponse::reply(format!("Already unlocked {model}"))
                }
            }
            MorphCommand::Apply(model) => {
                if !self.ledger.is_unlocked(&player, &model) {
                    return CommandResponse::reply(format!("Not unlocked: {model}"));
                }
                match self.applier.apply(world, entity, &model) {
                    Ok(()) => CommandResponse::reply(format!("Morphed into {model}")),
                    Err(e) => {
                        warn!("Applying {} for {} failed: {}", model, player, e);
                        CommandResponse::reply("Failed.")
                    }
                }
            }
        }
    }

    /// Handle an entry picked on the selection page. The page is closed afterwards
    /// whatever the outcome.
    pub fn select(
        &self,
        world: &dyn World,
        player: PlayerId,
        entity: EntityRef,
        action: SelectionAction,
    ) -> CommandResponse {
        let response = match action {
            SelectionAction::Unmorph => self.unmorph(world, entity),
            SelectionAction::Apply(model) => self.execute(world, player, entity, MorphCommand::Apply(model)),
        };
        self.host.close_page(&player);
        response
    }

    fn open_page(&self, player: PlayerId) -> CommandResponse {
        let page = SelectionPage::build(&self.ledger.list_unlocked(&player));
        match self.host.open_page(&player, &page) {
            Ok(()) => CommandResponse::default(),
            Err(e) => {
                warn!("Opening morph page for {} failed: {}", player, e);
                CommandResponse::reply("Failed to open UI.")
            }
        }
    }

    fn unmorph(&self, world: &dyn World, entity: EntityRef) -> CommandResponse {
        match self.applier.begin_unmorph(world, entity) {
            UnmorphOutcome::Refreshing => CommandResponse {
                replies: vec![Message::raw("Unmorphing...")],
                follow_up: Some(FollowUp::FinishUnmorph(entity)),
            },
            UnmorphOutcome::Fallback => CommandResponse::reply("Unmorphed (Fallback)."),
            UnmorphOutcome::Failed(reason) => CommandResponse::reply(format!("Unmorph Failed: {reason}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::memory_host::{MemoryHost, MemoryWorld};

    #[test]
    fn parse_covers_every_verb() {
        assert_eq!(MorphCommand::parse(""), MorphCommand::OpenUi);
        assert_eq!(MorphCommand::parse("morph"), MorphCommand::OpenUi);
        assert_eq!(MorphCommand::parse("  MORPH   ui "), MorphCommand::OpenUi);
        assert_eq!(MorphCommand::parse("morph --help"), MorphCommand::Help);
        assert_eq!(MorphCommand::parse("HELP"), MorphCommand::Help);
        assert_eq!(MorphCommand::parse("list"), MorphCommand::List);
        assert_eq!(MorphCommand::parse("unmorph"), MorphCommand::Unmorph);
        assert_eq!(
            MorphCommand::parse("morph unlock wolf"),
            MorphCommand::Unlock(ModelId::from("wolf"))
        );
        assert_eq!(MorphCommand::parse("unlock"), MorphCommand::Help);
        assert_eq!(MorphCommand::parse("wolf"), MorphCommand::Apply(ModelId::from("wolf")));
        assert_eq!(MorphCommand::parse("List"), MorphCommand::Apply(ModelId::from("List")));
    }

    struct Fixture {
        host: Arc<MemoryHost>,
        ledger: Arc<UnlockLedger>,
        world: MemoryWorld,
        dispatcher: CommandDispatcher,
        player: PlayerId,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(MemoryHost::with_assets(["wolf", "bear", "player"]));
        let ledger = Arc::new(UnlockLedger::in_memory());
        let applier = Arc::new(MorphApplier::new(
            host.clone(),
            ModelId::from("player"),
            Duration::from_millis(500),
        ));
        let dispatcher = CommandDispatcher::new(ledger.clone(), applier, host.clone(), "morph.unlock".into());
        Fixture {
            host,
            ledger,
            world: MemoryWorld::new("overworld"),
            dispatcher,
            player: PlayerId::random(),
        }
    }

    impl Fixture {
        fn run(&self, input: &str) -> CommandResponse {
            self.dispatcher
                .execute(&self.world, self.player, EntityRef(1), MorphCommand::parse(input))
        }

        fn reply(&self, input: &str) -> String {
            self.run(input).replies[0].plain_text()
        }
    }

    #[test]
    fn list_for_unknown_player_is_empty() {
        let f = fixture();
        assert_eq!(f.reply("list"), "Morphs: ");
    }

    #[test]
    fn list_is_sorted() {
        let f = fixture();
        f.ledger.unlock(f.player, ModelId::from("wolf"));
        f.ledger.unlock(f.player, ModelId::from("bear"));
        assert_eq!(f.reply("list"), "Morphs: bear, wolf");
    }

    #[test]
    fn unlock_requires_permission() {
        let f = fixture();
        assert_eq!(f.reply("unlock wolf"), PERMISSION_DENIED);
        assert!(f.ledger.list_unlocked(&f.player).is_empty());

        f.host.grant_permission(f.player, "morph.unlock");
        assert_eq!(f.reply("unlock wolf"), "Unlocked wolf");
        assert_eq!(f.reply("unlock wolf"), "Already unlocked wolf");
    }

    #[test]
    fn applying_a_locked_model_is_rejected() {
        let f = fixture();
        assert_eq!(f.reply("wolf"), "Not unlocked: wolf");
        assert_eq!(f.world.model_override(EntityRef(1)), None);
    }

    #[test]
    fn applying_an_unlocked_model_morphs() {
        let f = fixture();
        f.ledger.unlock(f.player, ModelId::from("wolf"));
        assert_eq!(f.reply("wolf"), "Morphed into wolf");
        assert_eq!(f.world.model_override(EntityRef(1)), Some(ModelId::from("wolf")));
    }

    #[test]
    fn unlocked_model_without_asset_fails_softly() {
        let f = fixture();
        f.ledger.unlock(f.player, ModelId::from("dragon"));
        assert_eq!(f.reply("dragon"), "Failed.");
    }

    #[test]
    fn unmorph_schedules_refresh() {
        let f = fixture();
        let response = f.run("unmorph");
        assert_eq!(response.replies[0].plain_text(), "Unmorphing...");
        assert_eq!(response.follow_up, Some(FollowUp::FinishUnmorph(EntityRef(1))));
    }

    #[test]
    fn open_ui_shows_unlocked_models() {
        let f = fixture();
        f.ledger.unlock(f.player, ModelId::from("wolf"));
        assert!(f.run("").replies.is_empty());

        let page = f.host.open_page_for(&f.player).unwrap();
        assert_eq!(page.entries.len(), 2);
    }

    #[test]
    fn open_ui_failure_is_reported() {
        let f = fixture();
        f.host.set_pages_unavailable(true);
        assert_eq!(f.reply("ui"), "Failed to open UI.");
    }

    #[test]
    fn selection_applies_and_closes_page() {
        let f = fixture();
        f.ledger.unlock(f.player, ModelId::from("bear"));
        f.run("ui");

        let response = f.dispatcher.select(
            &f.world,
            f.player,
            EntityRef(1),
            SelectionAction::Apply(ModelId::from("bear")),
        );
        assert_eq!(response.replies[0].plain_text(), "Morphed into bear");
        assert!(f.host.open_page_for(&f.player).is_none());
    }
}
