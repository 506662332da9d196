// Backend paths consumed by this layer. Mutating endpoints are listed only so
// callers building queue configs share one spelling; the layer never
// interprets them.

pub const HEALTH: &str = "/health";

pub const SAVED_CONTACTS: &str = "/contacts/saved";
pub const SOCIAL_MATCHES: &str = "/social/matches";
pub const MESSAGE_CONNECTION_STATUS: &str = "/messages/connection-status";

pub const INSIGHT_STREAM: &str = "/insight";
pub const INSIGHT_SYNC: &str = "/insight/sync";

pub const SAVE_CONTACT: &str = "/contacts/save";
pub const UNSAVE_CONTACT: &str = "/contacts/unsave";
pub const UPDATE_STATUS: &str = "/contacts/update-status";
pub const SEND_EMAIL: &str = "/messages/send-email";
pub const SEND_DM: &str = "/social/send-dm";
