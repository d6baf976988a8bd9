pub mod compositor;
pub mod template;

pub use compositor::{
    compose_animation, compose_scroll, compose_still, ComposedAnimation, ComposedScroll,
    Definitions, ANIM_LAST,
};
pub use template::{bind, read_settings, AnimationType, Rendered, TemplateSettings};
