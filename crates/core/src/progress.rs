//! Progress arithmetic.
//!
//! Progress is a pure function of completed stages over total stages,
//! floored to an integer percentage: 2 of 9 stages is 22, not 23.

/// Integer progress as `floor(completed / total * 100)`.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed * 100) / total) as u8
}
