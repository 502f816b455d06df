//! Rectangular maze with Wilson-walk generation.
//!
//! All walls start intact; loop-erased random walks carve passages until
//! every cell is reachable, leaving a spanning tree. Walls are immutable
//! after generation; rewards only ever decrease as players collect them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cell::{Cell, CellPosition, Direction, Move};

/// Largest accepted width or height.
pub const MAX_DIMENSION: u16 = 20;

/// Maze errors.
#[derive(Debug, Error)]
pub enum MazeError {
    /// Width or height outside `1..=MAX_DIMENSION`.
    #[error("invalid maze dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u16,
        /// Requested height.
        height: u16,
    },

    /// The requested move is not possible in the current maze.
    #[error("invalid move request")]
    InvalidMove,

    /// A position lies outside the grid.
    #[error("position ({0}, {1}) is out of bounds")]
    OutOfBounds(u16, u16),
}

/// A rectangular maze of [`Cell`]s with a cached total reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maze {
    width: u16,
    height: u16,
    grid: Vec<Vec<Cell>>,
    total_reward: i64,
}

impl Maze {
    /// Generate a maze from OS entropy.
    pub fn generate(width: u16, height: u16) -> Result<Maze, MazeError> {
        Maze::generate_seeded(width, height, rand::random())
    }

    /// Generate a maze from a fixed seed, for reproducible layouts.
    pub fn generate_seeded(width: u16, height: u16, seed: u64) -> Result<Maze, MazeError> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(MazeError::InvalidDimensions { width, height });
        }

        let grid = vec![vec![Cell::walled(); width as usize]; height as usize];
        let mut maze = Maze {
            width,
            height,
            grid,
            total_reward: 0,
        };
        maze.carve(&mut StdRng::seed_from_u64(seed));
        Ok(maze)
    }

    /// Number of columns.
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Sum of all uncollected cell rewards.
    pub fn total_reward(&self) -> i64 {
        self.total_reward
    }

    /// Whether `pos` lies inside the grid.
    pub fn in_bounds(&self, pos: CellPosition) -> bool {
        pos.row < self.height && pos.col < self.width
    }

    /// The cell at `pos`, if in bounds.
    pub fn cell(&self, pos: CellPosition) -> Option<&Cell> {
        self.grid
            .get(pos.row as usize)
            .and_then(|row| row.get(pos.col as usize))
    }

    /// All in-bounds single-step moves from `pos`, in N, S, E, W order.
    /// Walls are not consulted; this is the raw adjacency used by
    /// generation and traversal.
    pub fn neighbors(&self, pos: CellPosition) -> Vec<Move> {
        Direction::ALL
            .iter()
            .filter_map(|&direction| {
                let to = pos.step(direction)?;
                self.in_bounds(to).then_some(Move {
                    from: pos,
                    to,
                    direction,
                })
            })
            .collect()
    }

    /// Build the move one step in `dir` from `from`, validating bounds and
    /// walls on both sides.
    pub fn valid_move(&self, from: CellPosition, dir: Direction) -> Result<Move, MazeError> {
        let to = from.step(dir).ok_or(MazeError::InvalidMove)?;
        let mv = Move {
            from,
            to,
            direction: dir,
        };
        if self.is_valid(&mv) {
            Ok(mv)
        } else {
            Err(MazeError::InvalidMove)
        }
    }

    /// Whether `mv` crosses an open wall between two in-bounds cells.
    pub fn is_valid(&self, mv: &Move) -> bool {
        let (Some(from), Some(to)) = (self.cell(mv.from), self.cell(mv.to)) else {
            return false;
        };
        if mv.from.step(mv.direction) != Some(mv.to) {
            return false;
        }
        !from.has_wall(mv.direction) && !to.has_wall(mv.direction.opposite())
    }

    /// Execute a validated move: collect and zero the destination reward.
    pub fn apply_move(&mut self, mv: &Move) -> Result<i32, MazeError> {
        if !self.is_valid(mv) {
            return Err(MazeError::InvalidMove);
        }
        self.take_reward(mv.to)
    }

    /// Zero the reward at `pos`, returning the amount removed.
    pub fn take_reward(&mut self, pos: CellPosition) -> Result<i32, MazeError> {
        if !self.in_bounds(pos) {
            return Err(MazeError::OutOfBounds(pos.row, pos.col));
        }
        let cell = &mut self.grid[pos.row as usize][pos.col as usize];
        let reward = cell.reward;
        cell.reward = 0;
        self.total_reward -= i64::from(reward);
        Ok(reward)
    }

    /// Assign `reward` to the cell at `pos`, keeping the cached total in sync.
    pub(crate) fn set_reward(&mut self, pos: CellPosition, reward: i32) {
        let cell = &mut self.grid[pos.row as usize][pos.col as usize];
        self.total_reward += i64::from(reward) - i64::from(cell.reward);
        cell.reward = reward;
    }

    fn random_position(&self, rng: &mut StdRng) -> CellPosition {
        CellPosition::new(rng.gen_range(0..self.height), rng.gen_range(0..self.width))
    }

    fn random_unvisited(
        &self,
        visited: &HashSet<CellPosition>,
        rng: &mut StdRng,
    ) -> CellPosition {
        loop {
            let pos = self.random_position(rng);
            if !visited.contains(&pos) {
                return pos;
            }
        }
    }

    /// Loop-erased random walk from an unvisited cell, recording the last
    /// exit taken from each cell touched. The walk ends on the first visited
    /// cell it reaches.
    fn random_walk(
        &self,
        visited: &HashSet<CellPosition>,
        rng: &mut StdRng,
    ) -> HashMap<CellPosition, Move> {
        let mut visits = HashMap::new();
        let mut cell = self.random_unvisited(visited, rng);
        loop {
            let neighbors = self.neighbors(cell);
            let pick = neighbors[rng.gen_range(0..neighbors.len())];
            visits.insert(cell, pick);
            if visited.contains(&pick.to) {
                return visits;
            }
            cell = pick.to;
        }
    }

    fn open_wall(&mut self, mv: &Move) {
        self.grid[mv.from.row as usize][mv.from.col as usize].set_wall(mv.direction, false);
        self.grid[mv.to.row as usize][mv.to.col as usize]
            .set_wall(mv.direction.opposite(), false);
    }

    fn carve(&mut self, rng: &mut StdRng) {
        let total = usize::from(self.width) * usize::from(self.height);
        let mut visited = HashSet::with_capacity(total);
        visited.insert(self.random_position(rng));

        while visited.len() < total {
            for (cell, mv) in self.random_walk(&visited, rng) {
                self.open_wall(&mv);
                visited.insert(cell);
            }
        }
    }

    /// A maze with every interior wall removed. Only used to script exact
    /// move sequences in tests.
    #[cfg(test)]
    pub(crate) fn fully_open(width: u16, height: u16) -> Maze {
        let mut maze = Maze {
            width,
            height,
            grid: vec![vec![Cell::walled(); width as usize]; height as usize],
            total_reward: 0,
        };
        for row in 0..height {
            for col in 0..width {
                let pos = CellPosition::new(row, col);
                for mv in maze.neighbors(pos) {
                    maze.open_wall(&mv);
                }
            }
        }
        maze
    }
}

impl fmt::Display for Maze {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "+{}", "---+".repeat(self.width as usize))?;
        for row in self.grid.iter() {
            let mut cells = String::from("|");
            let mut walls = String::from("+");
            for cell in row {
                if cell.reward != 0 {
                    cells.push_str(&format!("{:^3}", cell.reward));
                } else {
                    cells.push_str("   ");
                }
                cells.push(if cell.east_wall { '|' } else { ' ' });
                walls.push_str(if cell.south_wall { "---+" } else { "   +" });
            }
            writeln!(f, "{cells}")?;
            writeln!(f, "{walls}")?;
        }
        Ok(())
    }
}
