//! Maze cells, positions, directions and moves.

use serde::{Deserialize, Serialize};

/// Compass direction of a step between adjacent cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards row 0.
    North,
    /// Away from row 0.
    South,
    /// Towards higher columns.
    East,
    /// Towards lower columns.
    West,
}

impl Direction {
    /// All directions in a fixed N, S, E, W order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Row and column delta of a unit step in this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (-1, 0),
            Direction::South => (1, 0),
            Direction::East => (0, 1),
            Direction::West => (0, -1),
        }
    }

    /// The direction pointing back the way we came.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }
}

/// Row/column coordinates of a cell inside its maze.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPosition {
    /// Row index, 0 at the northern edge.
    pub row: u16,
    /// Column index, 0 at the western edge.
    pub col: u16,
}

impl CellPosition {
    /// Position at `(row, col)`.
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }

    /// The neighboring position one step in `dir`, or `None` if the step
    /// would leave the non-negative grid. Bounds against a concrete maze are
    /// checked by the maze itself.
    pub fn step(self, dir: Direction) -> Option<CellPosition> {
        let (dr, dc) = dir.delta();
        let row = i32::from(self.row) + dr;
        let col = i32::from(self.col) + dc;
        if row < 0 || col < 0 {
            return None;
        }
        Some(CellPosition::new(row as u16, col as u16))
    }

    /// Manhattan distance to `other`.
    pub fn manhattan(self, other: CellPosition) -> u32 {
        let dr = i32::from(self.row) - i32::from(other.row);
        let dc = i32::from(self.col) - i32::from(other.col);
        dr.unsigned_abs() + dc.unsigned_abs()
    }
}

/// A single maze cell: four walls and an optional reward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Wall towards row - 1.
    pub north_wall: bool,
    /// Wall towards row + 1.
    pub south_wall: bool,
    /// Wall towards col + 1.
    pub east_wall: bool,
    /// Wall towards col - 1.
    pub west_wall: bool,
    /// Reward collected by the first player to enter.
    pub reward: i32,
}

impl Cell {
    /// A cell with all four walls intact and no reward.
    pub fn walled() -> Self {
        Self {
            north_wall: true,
            south_wall: true,
            east_wall: true,
            west_wall: true,
            reward: 0,
        }
    }

    /// Whether the wall facing `dir` is present.
    pub fn has_wall(&self, dir: Direction) -> bool {
        match dir {
            Direction::North => self.north_wall,
            Direction::South => self.south_wall,
            Direction::East => self.east_wall,
            Direction::West => self.west_wall,
        }
    }

    /// Set the wall facing `dir`.
    pub fn set_wall(&mut self, dir: Direction, present: bool) {
        match dir {
            Direction::North => self.north_wall = present,
            Direction::South => self.south_wall = present,
            Direction::East => self.east_wall = present,
            Direction::West => self.west_wall = present,
        }
    }
}

/// A step between two adjacent cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// Origin cell.
    pub from: CellPosition,
    /// Destination cell, one step from the origin.
    pub to: CellPosition,
    /// Direction of the step.
    pub direction: Direction,
}
