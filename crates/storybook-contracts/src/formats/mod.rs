mod catalog;
mod resolver;

pub use catalog::{BookFormatSpec, FormatCatalog, DEFAULT_FORMAT_ID, PRINT_DPI};
pub use resolver::{
    print_dimensions, DimensionResolver, FormatInfo, PrintDimensions, ResolvedDimensions,
};
