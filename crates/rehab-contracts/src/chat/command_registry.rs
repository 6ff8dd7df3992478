#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: "upload",
}];

pub(crate) const TITLE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "restore",
        action: "restore",
    },
    CommandSpec {
        command: "iterate",
        action: "iterate",
    },
];

pub(crate) const FACE_ID_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "regen",
    action: "regenerate_face",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "all",
        action: "generate_all",
    },
    CommandSpec {
        command: "faces",
        action: "face_closeups",
    },
    CommandSpec {
        command: "transplant",
        action: "transplant",
    },
    CommandSpec {
        command: "iterate_transplant",
        action: "iterate_transplant",
    },
    CommandSpec {
        command: "save",
        action: "save",
    },
    CommandSpec {
        command: "load",
        action: "load",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "log",
        action: "show_log",
    },
    CommandSpec {
        command: "prompts",
        action: "show_prompts",
    },
    CommandSpec {
        command: "test_mode",
        action: "toggle_test_mode",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const THEME_COMMAND: CommandSpec = CommandSpec {
    command: "theme",
    action: "set_theme",
};

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload",
    "/restore",
    "/iterate",
    "/all",
    "/faces",
    "/regen",
    "/transplant",
    "/iterate_transplant",
    "/save",
    "/load",
    "/export",
    "/reset",
    "/status",
    "/log",
    "/prompts",
    "/theme",
    "/test_mode",
    "/help",
];
