//! Per-turn reasoning budget.

/// Appended to reasoning text cut at the character cap.
pub const TRUNCATION_MARKER: &str = "… [reasoning truncated]";

/// Outcome of offering a reasoning delta to the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDecision {
    Pass,
    /// Deliver this text instead.
    Truncated(String),
    Dropped,
}

/// Caps the number and total size of reasoning events in one turn.
#[derive(Debug, Clone)]
pub struct ReasoningBudget {
    max_events: u32,
    max_chars: usize,
    events: u32,
    chars: usize,
}

impl ReasoningBudget {
    pub fn new(max_events: u32, max_chars: usize) -> Self {
        Self {
            max_events,
            max_chars,
            events: 0,
            chars: 0,
        }
    }

    pub fn admit(&mut self, text: &str) -> BudgetDecision {
        if self.events >= self.max_events || self.chars >= self.max_chars {
            return BudgetDecision::Dropped;
        }
        self.events += 1;

        let len = text.chars().count();
        let remaining = self.max_chars - self.chars;
        if len <= remaining {
            self.chars += len;
            return BudgetDecision::Pass;
        }
        self.chars = self.max_chars;
        let mut kept: String = text.chars().take(remaining).collect();
        kept.push_str(TRUNCATION_MARKER);
        BudgetDecision::Truncated(kept)
    }

    pub fn reset_turn(&mut self) {
        self.events = 0;
        self.chars = 0;
    }

    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn chars(&self) -> usize {
        self.chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_cap_drops_excess_events() {
        let mut budget = ReasoningBudget::new(10, 5_000);
        let delivered = (0..15)
            .filter(|_| budget.admit("thinking") != BudgetDecision::Dropped)
            .count();
        assert_eq!(delivered, 10);

        budget.reset_turn();
        assert_eq!(budget.admit("again"), BudgetDecision::Pass);
    }

    #[test]
    fn crossing_the_char_cap_truncates_once() {
        let mut budget = ReasoningBudget::new(10, 8);
        assert_eq!(budget.admit("héllo"), BudgetDecision::Pass);
        assert_eq!(
            budget.admit("wörld"),
            BudgetDecision::Truncated(format!("wör{TRUNCATION_MARKER}"))
        );
        assert_eq!(budget.admit("more"), BudgetDecision::Dropped);
        assert_eq!(budget.chars(), 8);
    }
}
