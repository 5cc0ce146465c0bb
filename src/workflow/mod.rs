pub mod answer;
pub mod controller;
pub mod focus;
pub mod notice;
pub mod pool;
pub mod stagger;
pub mod state;
pub mod view;
pub mod viewer;
