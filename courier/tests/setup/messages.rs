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
use courier::prelude::*;

#[courier_message(name = "Sales.PlaceOrder")]
pub struct PlaceOrder {
    pub order_id: u64,
}

#[courier_message(name = "Sales.OrderEvent", event)]
pub struct OrderEvent {
    pub order_id: u64,
}

#[courier_message(name = "Sales.OrderPlaced", implements(OrderEvent), event)]
pub struct OrderPlaced {
    pub order_id: u64,
    pub total_cents: u64,
}

#[courier_message(name = "Shipping.ShipOrder")]
pub struct ShipOrder {
    pub order_id: u64,
}

#[courier_message(name = "Diagnostics.Ping")]
pub struct Ping {
    pub sequence: u32,
}

#[courier_message(name = "Diagnostics.Pong")]
pub struct Pong {
    pub sequence: u32,
}
