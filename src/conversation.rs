//! Pure nurture-dialogue state machine.
//!
//! `transition` is total over every `(step, text)` pair and performs no I/O;
//! the orchestrator owns persistence and delivery.

use crate::models::{ConversationStep, Money, ReminderType};
use regex::Regex;
use std::sync::LazyLock;

/// First integer followed by an area unit, e.g. `35 m2`, `35m²`, `35 vierkante meter`.
static AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)(?:[.,]\d+)?\s*(?:m2|m²|m\^2|vierkante\s+meters?|meters?|vm)(?:[^\p{L}\d]|$)",
    )
    .expect("area regex is valid")
});

const AFFIRMATIVE: &[&str] = &["ja", "yes", "graag", "prima", "ok", "oke", "akkoord", "goed"];
const NEGATIVE: &[&str] = &["nee", "niet", "no", "geen"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatEstimateSettings {
    /// Area used when a details reply carries no recognizable measurement.
    pub default_area_m2: u32,
}

impl Default for ChatEstimateSettings {
    fn default() -> Self {
        Self { default_area_m2: 50 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatService {
    Stucwerk,
    Schilderwerk,
    Advies,
}

impl ChatService {
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            ChatService::Stucwerk => &["1", "stucwerk", "stuc", "stucen"],
            ChatService::Schilderwerk => &["2", "schilderwerk", "schilderen", "schilder"],
            ChatService::Advies => &["3", "advies", "anders"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Moved to a new step.
    Advanced,
    /// Reply did not match the step; the step's prompt is re-sent.
    Unrecognized,
    /// Step stays put without an outbound message.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConversationStep,
    pub outbound: Option<String>,
    pub outcome: TransitionOutcome,
}

impl Transition {
    fn advance(next: ConversationStep, message: String) -> Self {
        Self {
            next,
            outbound: Some(message),
            outcome: TransitionOutcome::Advanced,
        }
    }

    fn unrecognized(step: ConversationStep) -> Self {
        Self {
            next: step,
            outbound: prompt_for(step),
            outcome: TransitionOutcome::Unrecognized,
        }
    }

    fn wait(step: ConversationStep) -> Self {
        Self {
            next: step,
            outbound: None,
            outcome: TransitionOutcome::Waiting,
        }
    }
}

pub fn transition(
    step: ConversationStep,
    text: &str,
    settings: &ChatEstimateSettings,
) -> Transition {
    match step {
        ConversationStep::Initial => {
            Transition::advance(ConversationStep::ServiceChoice, service_menu())
        }
        ConversationStep::ServiceChoice => match parse_service_choice(text) {
            Some(ChatService::Stucwerk) => Transition::advance(
                ConversationStep::StucwerkDetails,
                details_prompt(ChatService::Stucwerk),
            ),
            Some(ChatService::Schilderwerk) => Transition::advance(
                ConversationStep::SchilderwerkDetails,
                details_prompt(ChatService::Schilderwerk),
            ),
            Some(ChatService::Advies) => Transition::advance(
                ConversationStep::AppointmentBooking,
                "Prima, dan plannen we graag een adviesgesprek bij u thuis. \
                 Zal ik een afspraak voor u inplannen? Antwoord met 'ja' om te bevestigen."
                    .to_string(),
            ),
            None => Transition::unrecognized(step),
        },
        ConversationStep::StucwerkDetails | ConversationStep::SchilderwerkDetails => {
            let service = if step == ConversationStep::StucwerkDetails {
                ChatService::Stucwerk
            } else {
                ChatService::Schilderwerk
            };
            let area = extract_area_m2(text).unwrap_or(settings.default_area_m2);
            let estimate = chat_estimate(service, area);
            Transition::advance(
                ConversationStep::AppointmentBooking,
                format!(
                    "Bedankt! Voor ongeveer {} m² {} komt de indicatie op {} (incl. btw). \
                     Zullen we een afspraak inplannen om alles op te meten? Antwoord met 'ja' om te bevestigen.",
                    area,
                    service_label(service),
                    estimate
                ),
            )
        }
        ConversationStep::AppointmentBooking => {
            if is_affirmative(text) {
                Transition::advance(
                    ConversationStep::Completed,
                    "Top! We nemen binnen één werkdag contact met u op om de afspraak definitief te maken."
                        .to_string(),
                )
            } else {
                Transition::wait(step)
            }
        }
        ConversationStep::Completed => Transition::wait(step),
    }
}

/// Opening message sent by the outbound trigger.
pub fn initial_prompt(customer_name: &str) -> String {
    let name = customer_name.split_whitespace().next().unwrap_or("");
    let greeting = if name.is_empty() {
        "Hallo!".to_string()
    } else {
        format!("Hallo {}!", name)
    };
    format!(
        "{} Bedankt voor uw aanvraag. Mogen we u een paar korte vragen stellen om u snel een prijsindicatie te geven? \
         Stuur een willekeurig bericht om te beginnen.",
        greeting
    )
}

/// The prompt a step waits on, re-sent on unrecognized input.
pub fn prompt_for(step: ConversationStep) -> Option<String> {
    match step {
        ConversationStep::Initial => None,
        ConversationStep::ServiceChoice => Some(service_menu()),
        ConversationStep::StucwerkDetails => Some(details_prompt(ChatService::Stucwerk)),
        ConversationStep::SchilderwerkDetails => Some(details_prompt(ChatService::Schilderwerk)),
        ConversationStep::AppointmentBooking | ConversationStep::Completed => None,
    }
}

pub fn reminder_message(customer_name: &str, reminder: ReminderType) -> String {
    let name = customer_name.split_whitespace().next().unwrap_or("");
    match reminder {
        ReminderType::FirstReminder => format!(
            "Hallo {}, we hebben nog niets van u gehoord. Heeft u nog interesse in een prijsindicatie? \
             Stuur ons gerust een bericht.",
            name
        ),
        ReminderType::SecondReminder => format!(
            "Hallo {}, dit is ons laatste berichtje. Wilt u toch nog een prijsindicatie ontvangen? \
             Reageer dan op dit bericht.",
            name
        ),
    }
}

fn service_menu() -> String {
    "Waarmee kunnen we u helpen?\n1. Stucwerk\n2. Schilderwerk\n3. Advies / anders\n\
     Antwoord met het nummer van uw keuze."
        .to_string()
}

fn details_prompt(service: ChatService) -> String {
    format!(
        "Hoeveel vierkante meter {} gaat het ongeveer om? Bijvoorbeeld: 40 m2",
        service_label(service)
    )
}

fn service_label(service: ChatService) -> &'static str {
    match service {
        ChatService::Stucwerk => "stucwerk",
        ChatService::Schilderwerk => "schilderwerk",
        ChatService::Advies => "advies",
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Matches when exactly one service is named; ambiguous replies are unrecognized.
pub fn parse_service_choice(text: &str) -> Option<ChatService> {
    let mut matched: Option<ChatService> = None;
    for word in words(text) {
        for service in [ChatService::Stucwerk, ChatService::Schilderwerk, ChatService::Advies] {
            if service.keywords().contains(&word.as_str()) {
                match matched {
                    Some(existing) if existing != service => return None,
                    _ => matched = Some(service),
                }
            }
        }
    }
    matched
}

/// Any negative word wins over affirmative ones ("nee, niet goed").
pub fn is_affirmative(text: &str) -> bool {
    let mut affirmative = false;
    for word in words(text) {
        if NEGATIVE.contains(&word.as_str()) {
            return false;
        }
        if AFFIRMATIVE.contains(&word.as_str()) {
            affirmative = true;
        }
    }
    affirmative
}

/// First positive integer followed by an area unit.
pub fn extract_area_m2(text: &str) -> Option<u32> {
    AREA_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .find(|area| *area > 0)
}

/// Rough chat estimate: a per-m² rate plus a fixed call-out fee.
pub fn chat_estimate(service: ChatService, area_m2: u32) -> Money {
    match service {
        ChatService::Stucwerk => Money::euros(22) * area_m2 + Money::euros(150),
        ChatService::Schilderwerk => Money::euros(14) * area_m2 + Money::euros(95),
        ChatService::Advies => Money::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ChatEstimateSettings {
        ChatEstimateSettings::default()
    }

    #[test]
    fn test_initial_reply_sends_menu() {
        let t = transition(ConversationStep::Initial, "hoi", &settings());
        assert_eq!(t.next, ConversationStep::ServiceChoice);
        assert_eq!(t.outcome, TransitionOutcome::Advanced);
        assert!(t.outbound.unwrap().contains("1. Stucwerk"));
    }

    #[test]
    fn test_service_choice_by_number_and_keyword() {
        let t = transition(ConversationStep::ServiceChoice, "1", &settings());
        assert_eq!(t.next, ConversationStep::StucwerkDetails);

        let t = transition(ConversationStep::ServiceChoice, "Schilderwerk graag", &settings());
        assert_eq!(t.next, ConversationStep::SchilderwerkDetails);

        let t = transition(ConversationStep::ServiceChoice, "3", &settings());
        assert_eq!(t.next, ConversationStep::AppointmentBooking);
    }

    #[test]
    fn test_service_choice_unmatched_reissues_menu() {
        let t = transition(ConversationStep::ServiceChoice, "wat kost het?", &settings());
        assert_eq!(t.next, ConversationStep::ServiceChoice);
        assert_eq!(t.outcome, TransitionOutcome::Unrecognized);
        assert_eq!(t.outbound, prompt_for(ConversationStep::ServiceChoice));
    }

    #[test]
    fn test_service_choice_ambiguous_is_unrecognized() {
        let t = transition(ConversationStep::ServiceChoice, "1 of 2", &settings());
        assert_eq!(t.outcome, TransitionOutcome::Unrecognized);
    }

    #[test]
    fn test_details_extracts_area() {
        let t = transition(
            ConversationStep::StucwerkDetails,
            "Het gaat om 35 m2 in de woonkamer",
            &settings(),
        );
        assert_eq!(t.next, ConversationStep::AppointmentBooking);
        // 35 * 22 + 150 = 920
        let msg = t.outbound.unwrap();
        assert!(msg.contains("35 m²"), "{}", msg);
        assert!(msg.contains("€ 920,00"), "{}", msg);
    }

    #[test]
    fn test_details_falls_back_to_default_area() {
        let t = transition(ConversationStep::SchilderwerkDetails, "geen idee", &settings());
        assert_eq!(t.next, ConversationStep::AppointmentBooking);
        // 50 * 14 + 95 = 795
        assert!(t.outbound.unwrap().contains("€ 795,00"));
    }

    #[test]
    fn test_extract_area_variants() {
        assert_eq!(extract_area_m2("ongeveer 40m2"), Some(40));
        assert_eq!(extract_area_m2("12 M²."), Some(12));
        assert_eq!(extract_area_m2("80 vierkante meter"), Some(80));
        assert_eq!(extract_area_m2("3 kamers, samen 60 vm"), Some(60));
        assert_eq!(extract_area_m2("25,5 m2"), Some(25));
        assert_eq!(extract_area_m2("0 m2 en 15 m2"), Some(15));
        assert_eq!(extract_area_m2("2 meterkasten"), None);
        assert_eq!(extract_area_m2("3 kamers"), None);
        assert_eq!(extract_area_m2("99999999999 m2"), None);
    }

    #[test]
    fn test_appointment_affirmative_completes() {
        let t = transition(ConversationStep::AppointmentBooking, "Ja graag!", &settings());
        assert_eq!(t.next, ConversationStep::Completed);
        assert!(t.outbound.is_some());
    }

    #[test]
    fn test_appointment_negative_waits_silently() {
        for text in ["nee", "liever niet", "ok, maar nee", "misschien later", "jammer"] {
            let t = transition(ConversationStep::AppointmentBooking, text, &settings());
            assert_eq!(t.next, ConversationStep::AppointmentBooking, "{}", text);
            assert_eq!(t.outbound, None);
            assert_eq!(t.outcome, TransitionOutcome::Waiting);
        }
    }

    #[test]
    fn test_completed_is_absorbing() {
        let t = transition(ConversationStep::Completed, "ja", &settings());
        assert_eq!(t.next, ConversationStep::Completed);
        assert_eq!(t.outbound, None);
    }

    #[test]
    fn test_initial_prompt_uses_first_name() {
        assert!(initial_prompt("Jan de Vries").starts_with("Hallo Jan!"));
        assert!(initial_prompt("  ").starts_with("Hallo!"));
    }
}
