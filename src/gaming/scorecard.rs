//! Yahtzee scoring table
//!
//! Thirteen categories, each scored once per player:
//! - Upper section: sum of the dice showing that face
//! - Three/four of a kind and chance: sum of all dice
//! - Full house 25, small straight 30, large straight 40, yahtzee 50
//!
//! An upper section worth 63 or more earns a bonus of 35.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::protocol::constants::DICE_COUNT;

pub const UPPER_BONUS_THRESHOLD: u16 = 63;
pub const UPPER_BONUS: u16 = 35;

/// Scorecard categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    // Upper section
    Aces,
    Twos,
    Threes,
    Fours,
    Fives,
    Sixes,

    // Lower section
    ThreeOfAKind,
    FourOfAKind,
    FullHouse,
    SmallStraight,
    LargeStraight,
    Yahtzee,
    Chance,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Aces,
        Category::Twos,
        Category::Threes,
        Category::Fours,
        Category::Fives,
        Category::Sixes,
        Category::ThreeOfAKind,
        Category::FourOfAKind,
        Category::FullHouse,
        Category::SmallStraight,
        Category::LargeStraight,
        Category::Yahtzee,
        Category::Chance,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_upper(self) -> bool {
        self.index() < 6
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Aces => "aces",
            Category::Twos => "twos",
            Category::Threes => "threes",
            Category::Fours => "fours",
            Category::Fives => "fives",
            Category::Sixes => "sixes",
            Category::ThreeOfAKind => "threeOfAKind",
            Category::FourOfAKind => "fourOfAKind",
            Category::FullHouse => "fullHouse",
            Category::SmallStraight => "smallStraight",
            Category::LargeStraight => "largeStraight",
            Category::Yahtzee => "yahtzee",
            Category::Chance => "chance",
        }
    }

    /// Points these dice are worth in this category
    pub fn score(self, dice: &[u8; DICE_COUNT]) -> u16 {
        let counts = face_counts(dice);
        let total: u16 = dice.iter().map(|&d| d as u16).sum();
        let has_count = |n: u8| counts.iter().any(|&c| c == n);
        let at_least = |n: u8| counts.iter().any(|&c| c >= n);

        match self {
            Category::Aces
            | Category::Twos
            | Category::Threes
            | Category::Fours
            | Category::Fives
            | Category::Sixes => {
                let face = self.index() as u8 + 1;
                counts[self.index()] as u16 * face as u16
            }
            Category::ThreeOfAKind => if at_least(3) { total } else { 0 },
            Category::FourOfAKind => if at_least(4) { total } else { 0 },
            Category::FullHouse => if has_count(3) && has_count(2) { 25 } else { 0 },
            Category::SmallStraight => if longest_run(&counts) >= 4 { 30 } else { 0 },
            Category::LargeStraight => if longest_run(&counts) >= 5 { 40 } else { 0 },
            Category::Yahtzee => if has_count(5) { 50 } else { 0 },
            Category::Chance => total,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

fn face_counts(dice: &[u8; DICE_COUNT]) -> [u8; 6] {
    let mut counts = [0u8; 6];
    for &d in dice {
        if (1..=6).contains(&d) {
            counts[d as usize - 1] += 1;
        }
    }
    counts
}

fn longest_run(counts: &[u8; 6]) -> usize {
    counts
        .iter()
        .fold((0, 0), |(best, run), &c| {
            let run = if c > 0 { run + 1 } else { 0 };
            (best.max(run), run)
        })
        .0
}

/// Section totals of a scorecard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub upper_points: u16,
    pub bonus: u16,
    pub upper_total: u16,
    pub lower_total: u16,
    pub total: u16,
}

/// One player's scorecard; `None` marks an unscored category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scorecard([Option<u16>; 13]);

impl Scorecard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category) -> Option<u16> {
        self.0[category.index()]
    }

    pub fn is_recorded(&self, category: Category) -> bool {
        self.get(category).is_some()
    }

    /// Set a category; returns false if it was already recorded.
    pub(crate) fn record(&mut self, category: Category, points: u16) -> bool {
        let slot = &mut self.0[category.index()];
        if slot.is_some() {
            return false;
        }
        *slot = Some(points);
        true
    }

    pub fn is_full(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    pub fn open_categories(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(|c| !self.is_recorded(*c))
    }

    pub fn totals(&self) -> Totals {
        let section = |upper: bool| -> u16 {
            Category::ALL
                .iter()
                .filter(|c| c.is_upper() == upper)
                .filter_map(|c| self.get(*c))
                .sum()
        };
        let upper_points = section(true);
        let bonus = if upper_points >= UPPER_BONUS_THRESHOLD { UPPER_BONUS } else { 0 };
        let upper_total = upper_points + bonus;
        let lower_total = section(false);
        Totals {
            upper_points,
            bonus,
            upper_total,
            lower_total,
            total: upper_total + lower_total,
        }
    }
}
