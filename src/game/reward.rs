//! Reward distribution over a generated maze.
//!
//! Cells are visited once in depth-first order from the origin. Each cell
//! draws between two reward tiers; the odds of the first tier rise slightly
//! towards the maze center, so the contested middle is worth the detour.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cell::CellPosition;
use super::maze::Maze;

/// Two-tier reward model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RewardModel {
    /// Value drawn with probability `base_prob` (adjusted by distance).
    pub reward_one: i32,
    /// Value drawn otherwise.
    pub reward_two: i32,
    /// Base probability of `reward_one`, in `[0, 1]`.
    pub base_prob: f32,
}

impl Default for RewardModel {
    fn default() -> Self {
        Self {
            reward_one: 1,
            reward_two: 5,
            base_prob: 0.9,
        }
    }
}

/// Reward distribution errors.
#[derive(Debug, Error)]
pub enum RewardError {
    /// Probability outside `[0, 1]` or a negative reward value.
    #[error("invalid reward model")]
    InvalidModel,
}

/// Assign a reward to every cell and refresh the maze's cached total.
pub fn distribute(
    model: RewardModel,
    maze: &mut Maze,
    rng: &mut StdRng,
) -> Result<(), RewardError> {
    if !(0.0..=1.0).contains(&model.base_prob) || model.reward_one.min(model.reward_two) < 0 {
        return Err(RewardError::InvalidModel);
    }

    let origin = CellPosition::new(0, 0);
    let mut visited = HashSet::new();
    let mut stack = vec![origin];
    visited.insert(origin);

    while let Some(pos) = stack.pop() {
        let p = placement_prob(model.base_prob, pos, maze.width(), maze.height());
        let reward = if rng.gen::<f32>() <= p {
            model.reward_one
        } else {
            model.reward_two
        };
        maze.set_reward(pos, reward);

        for mv in maze.neighbors(pos) {
            if visited.insert(mv.to) {
                stack.push(mv.to);
            }
        }
    }

    Ok(())
}

/// Probability of the first reward tier for a cell, scaled up as the cell
/// approaches the maze center.
fn placement_prob(base: f32, pos: CellPosition, width: u16, height: u16) -> f32 {
    let center = CellPosition::new(height / 2, width / 2);
    let max_dist = u32::from(height / 2) + u32::from(width / 2);
    if max_dist == 0 {
        return base;
    }
    let normalized = 1.0 - pos.manhattan(center) as f32 / max_dist as f32;
    base + (1.0 - base) * normalized / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn test_invalid_models_rejected() {
        let mut maze = Maze::generate_seeded(4, 4, 1).unwrap();
        let bad_prob = RewardModel {
            base_prob: 1.5,
            ..Default::default()
        };
        assert!(distribute(bad_prob, &mut maze, &mut rng(1)).is_err());

        let negative = RewardModel {
            reward_one: -1,
            ..Default::default()
        };
        assert!(distribute(negative, &mut maze, &mut rng(1)).is_err());
    }

    #[test]
    fn test_every_cell_rewarded() {
        let mut maze = Maze::generate_seeded(6, 5, 2).unwrap();
        distribute(RewardModel::default(), &mut maze, &mut rng(2)).unwrap();

        let model = RewardModel::default();
        for row in 0..maze.height() {
            for col in 0..maze.width() {
                let reward = maze.cell(CellPosition::new(row, col)).unwrap().reward;
                assert!(reward == model.reward_one || reward == model.reward_two);
            }
        }
    }

    #[test]
    fn test_total_matches_sum_of_cells() {
        let mut maze = Maze::generate_seeded(8, 8, 3).unwrap();
        distribute(RewardModel::default(), &mut maze, &mut rng(3)).unwrap();

        let mut sum = 0i64;
        for row in 0..maze.height() {
            for col in 0..maze.width() {
                sum += i64::from(maze.cell(CellPosition::new(row, col)).unwrap().reward);
            }
        }
        assert_eq!(sum, maze.total_reward());
        assert!(maze.total_reward() > 0);
    }

    #[test]
    fn test_placement_prob_bounds() {
        for row in 0..10 {
            for col in 0..10 {
                let p = placement_prob(0.9, CellPosition::new(row, col), 10, 10);
                assert!((0.9..=1.0).contains(&p), "p = {p}");
            }
        }
        // Center gets the largest bonus.
        let center = placement_prob(0.5, CellPosition::new(5, 5), 10, 10);
        let corner = placement_prob(0.5, CellPosition::new(0, 0), 10, 10);
        assert!(center > corner);
    }

    #[test]
    fn test_degenerate_single_cell() {
        let mut maze = Maze::generate_seeded(1, 1, 4).unwrap();
        distribute(RewardModel::default(), &mut maze, &mut rng(4)).unwrap();
        assert!(maze.total_reward() > 0);
    }
}
