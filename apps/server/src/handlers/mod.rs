pub mod attachments;
pub mod channels;
pub mod health;
pub mod invites;
pub mod messages;
pub mod rooms;
pub mod transfers;
pub mod users;
