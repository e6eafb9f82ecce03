mod bot;
mod command_encoder;
mod curtain;
mod plug_mini;

pub use self::bot::BotHandler;
pub use self::command_encoder::{
    BotCommand, CommandPayload, CurtainCommand, CurtainMode, PlugMiniCommand, PlugState,
};
pub use self::curtain::CurtainHandler;
pub use self::plug_mini::PlugMiniHandler;
