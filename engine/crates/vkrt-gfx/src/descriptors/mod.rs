pub mod descriptor_layout;
pub mod descriptor_pool;
