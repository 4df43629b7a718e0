//! Wrong-answer generation for multiple-choice rendering.

use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

/// Draws `k` distinct wrong answers from the scope's answer pool.
///
/// The correct answer is never among them. Pools smaller than `k` are padded
/// with "Option N" placeholders so the result is always exactly `k` long.
pub fn wrong_answers<R>(correct: &str, pool: &[String], k: usize, rng: &mut R) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let distinct: BTreeSet<&str> = pool
        .iter()
        .map(String::as_str)
        .filter(|answer| *answer != correct)
        .collect();
    let candidates: Vec<&str> = distinct.into_iter().collect();

    let mut wrong: Vec<String> = candidates
        .choose_multiple(rng, k)
        .map(|answer| (*answer).to_owned())
        .collect();

    let mut n = 1;
    while wrong.len() < k {
        let filler = format!("Option {n}");
        n += 1;
        if filler != correct && !wrong.contains(&filler) {
            wrong.push(filler);
        }
    }

    wrong
}

/// Combines the correct answer with its distractors in a uniformly random
/// presentation order.
pub fn shuffled_options<R>(correct: &str, wrong: &[String], rng: &mut R) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let mut options = Vec::with_capacity(wrong.len() + 1);
    options.push(correct.to_owned());
    options.extend_from_slice(wrong);
    options.shuffle(rng);
    options
}
