//! Task eligibility and tag mutation rules.
//!
//! Everything here is pure: functions take already-loaded records and never
//! touch the database. Persistence wraps these calls in `db::Repository`.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{Game, Player, Tag, Task, TaskKind};

/// Optional narrowing applied on top of the eligibility predicate.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub kind: Option<TaskKind>,
    /// Task ids to skip, typically the player's used-task history
    pub exclude: BTreeSet<String>,
}

impl TaskFilter {
    fn accepts(&self, task: &Task) -> bool {
        self.kind.map_or(true, |kind| task.kind == kind) && !self.exclude.contains(&task.id)
    }
}

/// Ids of the tags a player holds directly.
pub fn own_tag_ids(player: &Player) -> BTreeSet<String> {
    player.tags.iter().map(|t| t.id.clone()).collect()
}

/// Effective tag ids for matching: game tags and own tags allowed by the game's spice cap.
pub fn resolve_player_tags(player: &Player, game: &Game) -> BTreeSet<String> {
    game.tags
        .iter()
        .chain(player.tags.iter())
        .filter(|t| t.min_spice_level <= game.max_spice_rating)
        .map(|t| t.id.clone())
        .collect()
}

/// Whether `task` may be offered to `player` in `game`.
pub fn is_task_available(task: &Task, player: &Player, game: &Game) -> bool {
    if task.is_draft || task.spice_rating > game.max_spice_rating {
        return false;
    }

    let own = own_tag_ids(player);

    // Blocking tags override every positive match, the progression exception included.
    if !task.cant_have_tags.is_disjoint(&own) {
        return false;
    }

    if task.tags.is_empty() {
        return true;
    }

    let resolved = resolve_player_tags(player, game);
    if !task.tags.is_disjoint(&resolved) {
        return true;
    }

    // Keep tasks that would strip a tag the player holds reachable.
    !task.tags_to_remove.is_empty() && !task.tags_to_remove.is_disjoint(&own)
}

/// All tasks offered to the player, in input order.
pub fn list_available_tasks<'a>(
    tasks: &'a [Task],
    player: &Player,
    game: &Game,
    filter: &TaskFilter,
) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| filter.accepts(task) && is_task_available(task, player, game))
        .collect()
}

/// Pick one available task uniformly at random.
pub fn pick_random_task<'a, R: Rng + ?Sized>(
    tasks: &'a [Task],
    player: &Player,
    game: &Game,
    filter: &TaskFilter,
    rng: &mut R,
) -> Option<&'a Task> {
    list_available_tasks(tasks, player, game, filter)
        .choose(rng)
        .copied()
}

/// Detach every tag in `task.tags_to_remove` the player currently holds.
///
/// Returns the ids actually removed; absent tags are skipped.
pub fn remove_tags_from_player(task: &Task, player: &mut Player) -> Vec<String> {
    let mut removed = Vec::new();

    for tag_id in &task.tags_to_remove {
        if let Some(pos) = player.tags.iter().position(|t| &t.id == tag_id) {
            player.tags.remove(pos);
            removed.push(tag_id.clone());
        }
    }

    removed
}

/// Attach every tag in `task.tags_to_add` the player lacks.
///
/// Ids missing from `catalog` (deleted tags) are skipped. Returns the ids actually added.
pub fn add_tags_to_player(task: &Task, player: &mut Player, catalog: &[Tag]) -> Vec<String> {
    let mut added = Vec::new();

    for tag_id in &task.tags_to_add {
        if player.has_tag(tag_id) {
            continue;
        }
        if let Some(tag) = catalog.iter().find(|t| &t.id == tag_id) {
            player.tags.push(tag.clone());
            added.push(tag_id.clone());
        }
    }

    added
}

/// Tag changes produced by completing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionEffects {
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

/// Apply a completed task to the player: remove tags, add tags, then score a point.
pub fn complete_task(task: &Task, player: &mut Player, catalog: &[Tag]) -> CompletionEffects {
    let removed = remove_tags_from_player(task, player);
    let added = add_tags_to_player(task, player, catalog);
    player.score += 1;

    CompletionEffects { removed, added }
}
