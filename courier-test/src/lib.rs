/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Test support for Courier endpoints.
//!
//! ```rust,ignore
//! use courier_test::prelude::*;
//!
//! #[courier_test]
//! async fn publishes_reach_subscribers() -> anyhow::Result<()> {
//!     Ok(())
//! }
//! ```

/// Everything a test module needs, re-exported in one place.
pub mod prelude {
    pub use courier_test_macro::courier_test;
}

#[doc(hidden)]
pub mod __private {
    pub use parking_lot;
    pub use tokio;
    pub use tracing;
}
