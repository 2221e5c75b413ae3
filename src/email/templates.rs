use rust_decimal::Decimal;

use crate::entities::order::{self, OrderItem};
use crate::services::pricing::round_money;

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn money(amount: Decimal, currency: &str) -> String {
    let mut value = round_money(amount);
    value.rescale(2);
    format!("{} {}", currency, value)
}

fn item_description(item: &OrderItem) -> String {
    let mut description = format!("{} ({} {})", item.product_name, item.purity_level, item.metal_name);
    if let Some(stone) = &item.stone_name {
        description.push_str(&format!(", {}", stone));
    }
    if let Some(size) = &item.ring_size {
        description.push_str(&format!(", size {}", size));
    }
    description
}

/// Subject, HTML body and plain-text body of the order confirmation
pub fn order_confirmation(
    store_name: &str,
    customer_name: &str,
    order: &order::Model,
    items: &[OrderItem],
) -> (String, String, String) {
    let subject = format!("{}: order {} confirmed", store_name, order.order_number);

    let rows: String = items
        .iter()
        .map(|item| {
            format!(
                r#"<tr><td style="padding: 8px 0;">{}</td><td style="padding: 8px; text-align: center;">{}</td><td style="padding: 8px 0; text-align: right;">{}</td></tr>"#,
                escape(&item_description(item)),
                item.quantity,
                money(item.total_price, &order.currency),
            )
        })
        .collect();

    let html = format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>{subject}</title></head>
<body style="margin: 0; padding: 24px; font-family: Georgia, serif; color: #222;">
    <h1 style="font-size: 22px;">Thank you, {name}!</h1>
    <p>We received your order <strong>{number}</strong>.</p>
    <table role="presentation" style="width: 100%; border-collapse: collapse;">
        <tr><th style="text-align: left;">Item</th><th>Qty</th><th style="text-align: right;">Total</th></tr>
        {rows}
    </table>
    <p style="text-align: right; font-size: 18px;"><strong>Total: {total}</strong></p>
    <p style="color: #777; font-size: 12px;">{store}</p>
</body>
</html>"##,
        subject = escape(&subject),
        name = escape(customer_name),
        number = escape(&order.order_number),
        rows = rows,
        total = money(order.total, &order.currency),
        store = escape(store_name),
    );

    let mut text = format!(
        "Thank you, {}!\n\nWe received your order {}.\n\n",
        customer_name, order.order_number
    );
    for item in items {
        text.push_str(&format!(
            "- {} x{}: {}\n",
            item_description(item),
            item.quantity,
            money(item.total_price, &order.currency)
        ));
    }
    text.push_str(&format!("\nTotal: {}\n", money(order.total, &order.currency)));

    (subject, html, text)
}
