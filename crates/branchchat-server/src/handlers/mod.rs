pub mod branches;
pub mod chat;
pub mod conversations;
pub mod edit;
pub mod health;
pub mod reroll;
pub mod stop;
