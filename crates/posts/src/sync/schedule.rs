//! Adaptive page-size schedule for incremental rounds

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// First incremental round of this process
    Initial,
    /// Every round after that
    Steady,
}

/// Two-state page-size sequence: large once, small afterwards
///
/// The large first round catches up on everything posted while the process
/// was down. Not persisted; every process start begins in `Initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizeSchedule {
    state: ScheduleState,
    initial: usize,
    steady: usize,
}

impl PageSizeSchedule {
    pub fn new(initial: usize, steady: usize) -> Self {
        Self {
            state: ScheduleState::Initial,
            initial,
            steady,
        }
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    /// Page size for the current round
    pub fn current(&self) -> usize {
        match self.state {
            ScheduleState::Initial => self.initial,
            ScheduleState::Steady => self.steady,
        }
    }

    /// Move to the next round
    pub fn advance(&mut self) {
        self.state = ScheduleState::Steady;
    }
}

impl Default for PageSizeSchedule {
    fn default() -> Self {
        Self::new(1000, 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_then_steady() {
        let mut schedule = PageSizeSchedule::default();
        assert_eq!(schedule.state(), ScheduleState::Initial);
        assert_eq!(schedule.current(), 1000);

        schedule.advance();
        assert_eq!(schedule.state(), ScheduleState::Steady);
        assert_eq!(schedule.current(), 20);

        schedule.advance();
        assert_eq!(schedule.current(), 20);
    }
}
