//! Built-in state catalog used when the host supplies no `[[states]]`.

use super::rule::{PlatformEventType, StateDefinition, DEFAULT_STATE_KEY};

/// Directory, relative to the assets root, holding the built-in sprites.
const SPRITES: &str = "assets";

fn sprite(name: &str) -> String {
    format!("{SPRITES}/{name}.png")
}

/// The fixed catalog: default, follow, subscription, bits and clown.
///
/// Catalog order is significant: registry lookups return the first match.
pub fn default_catalog() -> Vec<StateDefinition> {
    vec![
        StateDefinition::new(
            DEFAULT_STATE_KEY,
            "Default",
            sprite("Default_Closed_Mouth"),
            sprite("Default_Open_Mouth"),
        ),
        StateDefinition::new(
            "follow",
            "Nuevo seguidor",
            sprite("Follower_Closed_Mouth"),
            sprite("Follower_Open_Mouth"),
        )
        .with_event(PlatformEventType::Follow)
        .with_command("!seguidor"),
        StateDefinition::new(
            "subscription",
            "Suscripción",
            sprite("Subscriber_Closed_Mouth"),
            sprite("Subscriber_Open_Mouth"),
        )
        .with_event(PlatformEventType::Subscription)
        .with_command("!subscripcion"),
        StateDefinition::new(
            "bits",
            "Bits",
            sprite("Bits_Closed_Mouth"),
            sprite("Bits_Open_Mouth"),
        )
        .with_event(PlatformEventType::Bits)
        .with_command("!bits"),
        StateDefinition::new(
            "clown",
            "Payaso",
            sprite("Payaso_Closed_Mouth"),
            sprite("Payaso_Open_Mouth"),
        )
        .with_command("!payaso"),
    ]
}
