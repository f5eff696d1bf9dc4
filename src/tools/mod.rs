//! 能力（工具）层：注册表、带超时的执行器，以及规划阶段使用的各项能力
//! （预算、天气、住宿、景点、路线、知识库检索）

pub mod accommodation;
pub mod budget;
pub mod executor;
pub mod knowledge_lookup;
pub mod location;
pub mod maps;
pub mod registry;
pub mod schema;
pub mod weather;

pub use accommodation::{AccommodationSearchTool, Lodging};
pub use budget::{BudgetEstimate, BudgetEstimateTool};
pub use executor::ToolExecutor;
pub use knowledge_lookup::KnowledgeLookupTool;
pub use location::{standardize as standardize_location, LocationResolver, LocationTable};
pub use maps::{AttractionSearchTool, MapsClient, RouteTool, DEFAULT_MAPS_API_BASE};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use weather::{WeatherForecastTool, DEFAULT_WEATHER_API_BASE};
