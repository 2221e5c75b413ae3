pub mod cart_item;
pub mod device_token;
pub mod metal;
pub mod notification;
pub mod order;
pub mod product;
pub mod stone_type;
pub mod user;
