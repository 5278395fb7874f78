pub mod post;
pub mod post_vote;
pub mod session;
pub mod user;
