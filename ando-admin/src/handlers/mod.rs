pub mod consumers;
pub mod health;
pub mod policies;
pub mod reload;
pub mod specs;
