#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is free text.
pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "imagine",
        action: "generate_image",
    },
    CommandSpec {
        command: "say",
        action: "send_message",
    },
];

/// Commands taking a path followed by optional free text.
pub(crate) const PATH_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upscale",
    action: "upscale_image",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "history",
        action: "show_history",
    },
    CommandSpec {
        command: "status",
        action: "show_status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/imagine <prompt>",
    "/upscale <path> [instruction]",
    "/say <text>",
    "/history",
    "/status",
    "/help",
    "/quit",
];
