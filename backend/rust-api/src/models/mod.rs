pub mod gamification;
pub mod import;
pub mod quiz;
pub mod referral;
pub mod reward;
