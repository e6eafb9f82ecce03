mod advertisement_view;
mod painter;
mod result_view;

pub(crate) use self::advertisement_view::AdvertisementView;
pub(crate) use self::painter::Painter;
pub(crate) use self::result_view::DoResultView;
