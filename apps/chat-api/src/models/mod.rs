pub mod blocked_ip;
pub mod comment;
pub mod match_info;
