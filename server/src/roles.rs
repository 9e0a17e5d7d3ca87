//! Role and task assignment when a game leaves the lobby

use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Game, Player, Role, Task};

pub const TASKS_PER_CREWMATE: usize = 3;

const TASK_TEMPLATES: [&str; 8] = [
    "Fix wiring",
    "Empty garbage",
    "Download data",
    "Calibrate distributor",
    "Clean filter",
    "Align engine output",
    "Swipe card",
    "Submit scan",
];

pub fn impostor_count(players: usize) -> usize {
    match players {
        0..=6 => 1,
        7..=10 => 2,
        _ => 3,
    }
}

/// Returns every player of `game` with a fresh role and, for crewmates, a
/// task list whose rooms are all drawn from the game's rooms.
pub fn assign_roles<R: Rng>(game: &Game, rng: &mut R) -> Vec<Player> {
    let mut order: Vec<usize> = (0..game.players.len()).collect();
    order.shuffle(rng);
    let impostors = impostor_count(game.players.len()).min(game.players.len());

    let mut assigned = game.players.clone();
    for (rank, &index) in order.iter().enumerate() {
        let player = &mut assigned[index];
        player.is_alive = true;
        if rank < impostors {
            player.role = Role::Impostor;
            player.tasks = Vec::new();
        } else {
            player.role = Role::Crewmate;
            player.tasks = draw_tasks(&player.id, &game.rooms, rng);
        }
    }
    assigned
}

fn draw_tasks<R: Rng>(player_id: &str, rooms: &[String], rng: &mut R) -> Vec<Task> {
    if rooms.is_empty() {
        return Vec::new();
    }

    (0..TASKS_PER_CREWMATE)
        .map(|i| {
            let room = &rooms[rng.gen_range(0..rooms.len())];
            let template = TASK_TEMPLATES[rng.gen_range(0..TASK_TEMPLATES.len())];
            Task {
                id: format!("{}-task-{}", player_id, i + 1),
                description: format!("{} in {}", template, room),
                room: room.clone(),
                completed: false,
            }
        })
        .collect()
}
