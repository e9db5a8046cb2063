use tracing::{debug, warn};

use crate::{
    config::{MediaPlayer, NotifierConfig},
    error::ControlResult,
    ports::StateReader,
    snapshot::read_switch,
    types::{ActuatorCommand, CommandKind, Notification},
};

const PLAYING: &str = "playing";

/// Expands a notification into push and text-to-speech commands.
#[derive(Debug, Clone)]
pub struct NotificationPlanner {
    config: NotifierConfig,
}

impl NotificationPlanner {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub fn plan(&self, notification: &Notification, reader: &dyn StateReader) -> Vec<ActuatorCommand> {
        if notification.message.trim().is_empty() {
            warn!("notifier: rejecting notification without message");
            return Vec::new();
        }

        let mut commands = Vec::new();

        if !notification.only_say {
            commands.extend(self.config.mobile_targets.iter().map(|target| {
                ActuatorCommand::new(
                    target.clone(),
                    CommandKind::Notify {
                        message: notification.message.clone(),
                        title: notification.title.clone(),
                        tag: notification.tag.clone(),
                    },
                )
            }));
        }

        if !notification.only_push {
            match self.speech_players(reader) {
                Ok(players) => commands.extend(players.into_iter().map(|player| {
                    ActuatorCommand::new(
                        player.entity_id.clone(),
                        CommandKind::Say {
                            message: notification.message.clone(),
                            language: self.config.language.clone(),
                        },
                    )
                })),
                Err(err) => warn!("notifier: speech skipped: {err}"),
            }
        }

        commands
    }

    fn speech_players(&self, reader: &dyn StateReader) -> ControlResult<Vec<&MediaPlayer>> {
        if read_switch(reader, &self.config.night_mode)? {
            debug!("notifier: no speech at night");
            return Ok(Vec::new());
        }
        if read_switch(reader, &self.config.guest_sleeping)? {
            debug!("notifier: no speech while guest is sleeping");
            return Ok(Vec::new());
        }

        let mut players = Vec::new();
        for player in &self.config.media_players {
            if let Some(occupancy) = &player.occupancy_entity_id {
                if !read_switch(reader, occupancy)? {
                    debug!("notifier: {} skipped, room not occupied", player.name);
                    continue;
                }
            }
            if reader.read_state(&player.entity_id).as_deref() == Some(PLAYING) {
                debug!("notifier: {} skipped, already playing", player.name);
                continue;
            }
            players.push(player);
        }
        Ok(players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, FakeStates};
    use pretty_assertions::assert_eq;

    fn planner() -> NotificationPlanner {
        NotificationPlanner::new(NotifierConfig {
            mobile_targets: vec![id("notify.mobile_app_phone")],
            media_players: vec![
                MediaPlayer {
                    name: "kitchen".to_string(),
                    entity_id: id("media_player.kitchen"),
                    occupancy_entity_id: Some(id("binary_sensor.kitchen_occupancy")),
                },
                MediaPlayer {
                    name: "living".to_string(),
                    entity_id: id("media_player.living"),
                    occupancy_entity_id: None,
                },
            ],
            language: "en".to_string(),
            night_mode: id("input_boolean.night_mode"),
            guest_sleeping: id("input_boolean.guest_sleeping"),
        })
    }

    fn home(night: &str, kitchen_occupied: &str, living: &str) -> FakeStates {
        FakeStates::new()
            .with_state("input_boolean.night_mode", night)
            .with_state("input_boolean.guest_sleeping", "off")
            .with_state("binary_sensor.kitchen_occupancy", kitchen_occupied)
            .with_state("media_player.kitchen", "idle")
            .with_state("media_player.living", living)
    }

    fn targets(commands: &[ActuatorCommand]) -> Vec<&str> {
        commands.iter().map(|command| command.target.as_str()).collect()
    }

    #[test]
    fn pushes_and_speaks_in_occupied_idle_rooms() {
        let commands = planner().plan(&Notification::new("Washer done"), &home("off", "on", "idle"));

        assert_eq!(
            targets(&commands),
            vec!["notify.mobile_app_phone", "media_player.kitchen", "media_player.living"]
        );
        assert_eq!(
            commands[1].kind,
            CommandKind::Say {
                message: "Washer done".to_string(),
                language: "en".to_string(),
            }
        );
    }

    #[test]
    fn skips_empty_rooms_and_busy_players() {
        let commands =
            planner().plan(&Notification::new("Washer done"), &home("off", "off", "playing"));

        assert_eq!(targets(&commands), vec!["notify.mobile_app_phone"]);
    }

    #[test]
    fn night_mode_silences_speech() {
        let commands = planner().plan(&Notification::new("Washer done"), &home("on", "on", "idle"));

        assert_eq!(targets(&commands), vec!["notify.mobile_app_phone"]);
    }

    #[test]
    fn only_flags_select_one_channel() {
        let states = home("off", "on", "idle");
        let only_say = Notification {
            only_say: true,
            ..Notification::new("Door open")
        };
        let only_push = Notification {
            only_push: true,
            ..Notification::new("Door open")
        };

        assert_eq!(
            targets(&planner().plan(&only_say, &states)),
            vec!["media_player.kitchen", "media_player.living"]
        );
        assert_eq!(
            targets(&planner().plan(&only_push, &states)),
            vec!["notify.mobile_app_phone"]
        );
    }

    #[test]
    fn unreadable_guest_flag_still_pushes() {
        let states = home("off", "on", "idle").with_state("input_boolean.guest_sleeping", "unknown");

        let commands = planner().plan(&Notification::new("Washer done"), &states);

        assert_eq!(targets(&commands), vec!["notify.mobile_app_phone"]);
    }

    #[test]
    fn blank_message_is_rejected() {
        assert!(planner()
            .plan(&Notification::new("  "), &home("off", "on", "idle"))
            .is_empty());
    }
}
