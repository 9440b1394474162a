//! Random display names and room ids.

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "clever", "curious", "eager", "gentle", "happy", "jolly", "keen",
    "lively", "lucky", "mellow", "nimble", "proud", "quiet", "rapid", "shy", "sleepy", "swift",
    "tidy", "witty", "wandering", "zesty",
];

const COLORS: &[&str] = &[
    "amber", "azure", "beige", "black", "blue", "bronze", "coral", "crimson", "cyan", "gold",
    "green", "indigo", "ivory", "lime", "magenta", "olive", "orange", "pink", "plum", "red",
    "silver", "teal", "violet", "white", "yellow",
];

const ANIMALS: &[&str] = &[
    "badger", "beaver", "bison", "crane", "dolphin", "eagle", "ferret", "fox", "gecko", "heron",
    "ibis", "jaguar", "koala", "lemur", "lynx", "marten", "newt", "otter", "owl", "panda",
    "puffin", "raven", "seal", "stork", "tapir", "walrus", "wolf", "yak", "zebra",
];

/// Alphabet of generated room ids (URL-safe).
pub const ROOM_ID_ALPHABET: &[u8; 64] =
    b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

pub const ROOM_ID_LEN: usize = 21;

/// `adjective-colour-animal`, e.g. `swift-teal-otter`.
pub fn random_username<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = pick(ADJECTIVES, rng);
    let color = pick(COLORS, rng);
    let animal = pick(ANIMALS, rng);
    format!("{adjective}-{color}-{animal}")
}

fn pick<R: Rng + ?Sized>(words: &[&'static str], rng: &mut R) -> &'static str {
    words.choose(rng).copied().unwrap_or("anonymous")
}

/// 21 random characters from [`ROOM_ID_ALPHABET`].
pub fn generate_room_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}
