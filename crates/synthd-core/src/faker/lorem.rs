//! Lorem word table shared by the faker and the fuzz mutation pass.

use rand::Rng;

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed",
    "eiusmod", "tempor", "incididunt", "labore", "dolore", "magna", "aliqua", "enim", "minim",
    "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi", "aliquip",
    "commodo", "consequat", "duis", "aute", "irure", "voluptate",
];

/// One random lorem word.
pub fn word<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    WORDS[rng.random_range(0..WORDS.len())]
}

/// `n` random lorem words joined by single spaces.
pub fn words<R: Rng + ?Sized>(rng: &mut R, n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(word(rng));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_joins_with_single_spaces() {
        let mut rng = rand::rng();
        let three = words(&mut rng, 3);
        assert_eq!(three.split(' ').count(), 3);
        assert!(words(&mut rng, 0).is_empty());
    }
}
