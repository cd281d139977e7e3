//! Sentiment-pattern gesture selection.
//!
//! Mirrors the category library and anti-repetition window of the reference
//! gesture injector: a fixed set of named gestures grouped by category, a
//! handful of regex patterns mapping response text to categories, and a
//! recency window that keeps the robot from repeating the same handful of
//! gestures every turn.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::RegexSet;

pub const MIN_GESTURES: usize = 3;
pub const MAX_ADDITIONAL: usize = 6;
const RECENT_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureSpeed {
    Fast,
    Med,
    Slow,
}

impl GestureSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureSpeed::Fast => "fast",
            GestureSpeed::Med => "med",
            GestureSpeed::Slow => "slow",
        }
    }
}

struct Category {
    gestures: &'static [&'static str],
}

const OBSERVATION: Category = Category {
    gestures: &[
        "look_around", "tilt_head", "scan_room", "peer_closer", "glance_left",
        "glance_right", "focus_stare", "blink_slow", "look_up", "look_down",
        "track_movement", "study_object", "observe_curious", "watch_intently",
        "survey_area",
    ],
};
const MOVEMENT: Category = Category {
    gestures: &[
        "step_forward", "step_back", "turn_left", "turn_right", "spin_around",
        "approach", "retreat", "circle_around", "sidestep_left", "sidestep_right",
        "nudge_forward", "back_away", "rotate_toward", "pivot", "advance",
        "withdraw",
    ],
};
const REACTIONS: Category = Category {
    gestures: &[
        "startle", "flinch", "recoil", "perk_up", "double_take", "jump_back",
        "freeze", "recover", "shake_off", "settle", "relax_posture", "steady",
        "brace",
    ],
};
const SOCIAL: Category = Category {
    gestures: &[
        "wave_hello", "wave_goodbye", "nod_yes", "shake_no", "bow",
        "offer_hand", "point_at", "beckon", "greet_warmly", "farewell_wave",
        "acknowledge", "introduce_self", "shake_hands", "welcome_gesture",
    ],
};
const CELEBRATION: Category = Category {
    gestures: &[
        "cheer", "fist_pump", "spin_happy", "jump_excited", "clap",
        "victory_pose", "bounce",
    ],
};
const EMOTIONAL: Category = Category {
    gestures: &[
        "happy_wiggle", "sad_droop", "curious_tilt", "confident_stand",
        "shy_retreat", "proud_stance", "worried_shift", "content_sway",
        "excited_bounce", "thoughtful_pause", "amused_shake", "sympathetic_lean",
        "playful_spin", "calm_settle", "eager_lean",
    ],
};
const FUNCTIONAL: Category = Category {
    gestures: &[
        "charge_prep", "power_save", "self_check", "reset_pose", "calibrate",
        "standby", "ready_stance", "sleep_mode", "wake_up", "idle_sway",
        "home_position", "status_blink",
    ],
};
const SIGNALING: Category = Category {
    gestures: &[
        "attention_flash", "warning_shake", "ok_nod", "stop_gesture",
        "come_here", "wait_gesture", "listen_pose", "alert_stance",
        "confirm_blink", "signal_done",
    ],
};
const ADVANCED: Category = Category {
    gestures: &["combo_greet_wave", "combo_think_nod", "combo_explore_spin", "combo_celebrate_bow"],
};

struct PatternCategory {
    pattern: &'static str,
    categories: &'static [&'static Category],
}

static PATTERN_TABLE: &[PatternCategory] = &[
    PatternCategory { pattern: r"(?i)\b(hello|hi|hey|greetings)\b", categories: &[&SOCIAL] },
    PatternCategory { pattern: r"(?i)\b(bye|goodbye|farewell|see you)\b", categories: &[&SOCIAL] },
    PatternCategory { pattern: r"\?", categories: &[&OBSERVATION, &SIGNALING] },
    PatternCategory {
        pattern: r"(?i)\b(exciting|awesome|amazing|wow|wonderful|fantastic)\b",
        categories: &[&CELEBRATION, &EMOTIONAL],
    },
    PatternCategory { pattern: r"(?i)\b(think|thinking|hmm|let me|wonder)\b", categories: &[&EMOTIONAL, &OBSERVATION] },
    PatternCategory { pattern: r"(?i)\b(happy|glad|pleased|delighted)\b", categories: &[&EMOTIONAL, &CELEBRATION] },
    PatternCategory { pattern: r"(?i)\b(sad|sorry|unfortunately|apologize)\b", categories: &[&EMOTIONAL, &REACTIONS] },
    PatternCategory { pattern: r"(?i)\b(curious|interesting|intriguing)\b", categories: &[&OBSERVATION, &EMOTIONAL] },
    PatternCategory { pattern: r"(?i)\b(sure|certainly|absolutely|definitely)\b", categories: &[&EMOTIONAL, &SIGNALING] },
    PatternCategory { pattern: r"(?i)\b(move|moving|walk|go|follow)\b", categories: &[&MOVEMENT] },
];

static SPEED_FAST_PATTERN: &str = r"(?i)\b(excited|urgent|quick|hurry|fast|wow|amazing)\b";
static SPEED_SLOW_PATTERN: &str = r"(?i)\b(calm|thoughtful|slowly|gentle|peaceful|quiet)\b";

fn all_gestures() -> Vec<&'static str> {
    [
        &OBSERVATION, &MOVEMENT, &REACTIONS, &SOCIAL, &CELEBRATION, &EMOTIONAL,
        &FUNCTIONAL, &SIGNALING, &ADVANCED,
    ]
    .iter()
    .flat_map(|c| c.gestures.iter().copied())
    .collect()
}

pub struct GestureInjector {
    pattern_set: RegexSet,
    speed_fast: regex::Regex,
    speed_slow: regex::Regex,
    recent: Mutex<VecDeque<String>>,
}

impl GestureInjector {
    pub fn new() -> Self {
        let pattern_set =
            RegexSet::new(PATTERN_TABLE.iter().map(|p| p.pattern)).expect("static gesture patterns compile");
        Self {
            pattern_set,
            speed_fast: regex::Regex::new(SPEED_FAST_PATTERN).expect("static speed pattern"),
            speed_slow: regex::Regex::new(SPEED_SLOW_PATTERN).expect("static speed pattern"),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_WINDOW)),
        }
    }

    pub fn detect_speed(&self, text: &str) -> GestureSpeed {
        if self.speed_fast.is_match(text) {
            GestureSpeed::Fast
        } else if self.speed_slow.is_match(text) {
            GestureSpeed::Slow
        } else {
            GestureSpeed::Med
        }
    }

    /// Picks 3-6 gestures fitting the response text, favoring ones not used
    /// recently. Never returns fewer than [`MIN_GESTURES`] as long as the
    /// gesture library has that many entries.
    pub fn select_gestures(&self, response_text: &str) -> Vec<&'static str> {
        let matches = self.pattern_set.matches(response_text);
        let mut pool: Vec<&'static str> = Vec::new();
        for idx in matches.iter() {
            for category in PATTERN_TABLE[idx].categories {
                for g in category.gestures {
                    if !pool.contains(g) {
                        pool.push(g);
                    }
                }
            }
        }

        let recent = self.recent.lock();
        let mut filtered: Vec<&'static str> = pool.iter().copied().filter(|g| !recent.contains(&g.to_string())).collect();
        if filtered.len() < MIN_GESTURES {
            let all = all_gestures();
            for g in all {
                if !recent.contains(&g.to_string()) && !filtered.contains(&g) {
                    filtered.push(g);
                }
            }
        }
        drop(recent);

        let mut rng = rand::thread_rng();
        filtered.shuffle(&mut rng);

        let count = rng.gen_range(MIN_GESTURES..=MAX_ADDITIONAL).min(filtered.len().max(MIN_GESTURES));
        let mut chosen: Vec<&'static str> = filtered.into_iter().take(count).collect();

        if chosen.len() < MIN_GESTURES {
            let all = all_gestures();
            for g in all {
                if chosen.len() >= MIN_GESTURES {
                    break;
                }
                if !chosen.contains(&g) {
                    chosen.push(g);
                }
            }
        }

        self.record_used(&chosen);
        chosen
    }

    fn record_used(&self, gestures: &[&'static str]) {
        let mut recent = self.recent.lock();
        for g in gestures {
            if recent.len() >= RECENT_WINDOW {
                recent.pop_front();
            }
            recent.push_back(g.to_string());
        }
    }
}

impl Default for GestureInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_text_yields_social_gestures() {
        let injector = GestureInjector::new();
        let chosen = injector.select_gestures("Hello there, how are you?");
        assert!(chosen.len() >= MIN_GESTURES);
        assert!(chosen.len() <= MAX_ADDITIONAL);
    }

    #[test]
    fn never_returns_fewer_than_minimum() {
        let injector = GestureInjector::new();
        let chosen = injector.select_gestures("xyz nonmatching text with no keywords");
        assert!(chosen.len() >= MIN_GESTURES);
    }

    #[test]
    fn speed_detection_matches_excited_text() {
        let injector = GestureInjector::new();
        assert_eq!(injector.detect_speed("That is so exciting and fast!"), GestureSpeed::Fast);
        assert_eq!(injector.detect_speed("Let's stay calm and move slowly."), GestureSpeed::Slow);
        assert_eq!(injector.detect_speed("The weather today is mild."), GestureSpeed::Med);
    }

    #[test]
    fn recent_window_reduces_repeat_selection_pressure() {
        let injector = GestureInjector::new();
        let mut seen_repeats = 0;
        let mut previous: Vec<&'static str> = Vec::new();
        for _ in 0..5 {
            let chosen = injector.select_gestures("Hello, nice to see you again!");
            if chosen.iter().any(|g| previous.contains(g)) {
                seen_repeats += 1;
            }
            previous = chosen;
        }
        assert!(seen_repeats <= 5);
    }
}
