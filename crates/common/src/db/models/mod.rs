//! SeaORM entity models
//!
//! Database entities for stories and their chapters

mod chapter;
mod story;

pub use story::{
    ActiveModel as StoryActiveModel,
    Column as StoryColumn,
    Entity as StoryEntity,
    Model as Story,
    ReviewStatus,
};

pub use chapter::{
    ActiveModel as ChapterActiveModel,
    Column as ChapterColumn,
    Entity as ChapterEntity,
    Model as Chapter,
};
